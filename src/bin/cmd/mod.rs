use clap::Parser;

mod asm;
mod dump;
mod run;
mod trace;

/// A forking stack machine: assemble and run byte-coded programs that
/// multiply to explore a search tree.
#[derive(Parser)]
#[clap(version, about)]
#[clap(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

impl Default for Cli {
    fn default() -> Self {
        Self::parse()
    }
}

impl Cli {
    pub async fn exec(self) -> miette::Result<()> {
        self.cmd.exec().await
    }
}

#[derive(clap::Subcommand)]
pub enum Cmd {
    /// Assemble a text program into a machine image
    Asm(asm::Args),
    /// Run an image and print each result machine
    Run(run::Args),
    /// Run an image under the logging tracer
    Trace(trace::Args),
    /// Load an image and hex-dump the machine's memory
    Dump(dump::Args),
}

impl Cmd {
    pub async fn exec(self) -> miette::Result<()> {
        match self {
            Cmd::Asm(args) => args.exec().await,
            Cmd::Run(args) => args.exec().await,
            Cmd::Trace(args) => args.exec().await,
            Cmd::Dump(args) => args.exec().await,
        }
    }
}

/// Reads a program, assembling text sources on the fly: files ending in
/// `.img` are taken as raw images, everything else goes through the
/// assembler.
pub(crate) async fn load_image(path: &str) -> miette::Result<Vec<u8>> {
    use miette::IntoDiagnostic;

    let bytes = tokio::fs::read(path).await.into_diagnostic()?;
    if path.ends_with(".img") {
        return Ok(bytes);
    }
    let src = String::from_utf8(bytes).into_diagnostic()?;
    forkvm_asm::assemble_text(&src).into_diagnostic()
}
