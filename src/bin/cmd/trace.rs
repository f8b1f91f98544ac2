use forkvm::{LogTracer, Mach, MachError};

/// Run an image under the logging tracer
#[derive(clap::Args)]
pub struct Args {
    /// Program image (`.img`) or text source
    file: String,
}

impl Args {
    pub async fn exec(self) -> miette::Result<()> {
        let img = super::load_image(&self.file).await?;

        let mut m = Mach::with_handler(&img, |m: &mut Mach| {
            // Record-keeping only; the trace lines carry the detail.
            match m.err() {
                Some(MachError::Halt(_)) | None => Ok(()),
                Some(err) => Err(err),
            }
        })
        .map_err(|err| miette::miette!("{err}"))?;

        let mut tracer = LogTracer::new(|line: &str| println!("{line}"));
        if let Err(err) = m.trace(&mut tracer) {
            println!("run error: {err}");
        }
        Ok(())
    }
}
