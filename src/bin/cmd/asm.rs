use std::path::PathBuf;

use miette::IntoDiagnostic;

/// Assemble a text program into a machine image
#[derive(clap::Args)]
pub struct Args {
    /// Program source file
    file: String,

    /// Output image path; defaults to the source with an `.img` extension
    #[clap(short, long)]
    output: Option<PathBuf>,
}

impl Args {
    pub async fn exec(self) -> miette::Result<()> {
        let src = tokio::fs::read_to_string(&self.file).await.into_diagnostic()?;
        let img = forkvm_asm::assemble_text(&src).into_diagnostic()?;

        let out = self
            .output
            .unwrap_or_else(|| PathBuf::from(&self.file).with_extension("img"));
        tokio::fs::write(&out, &img).await.into_diagnostic()?;

        println!("assembled {} -> {} ({} bytes)", self.file, out.display(), img.len());
        Ok(())
    }
}
