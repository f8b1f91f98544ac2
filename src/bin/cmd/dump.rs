use forkvm::Mach;

/// Load an image and hex-dump the machine's memory
#[derive(clap::Args)]
pub struct Args {
    /// Program image (`.img`) or text source
    file: String,
}

impl Args {
    pub async fn exec(self) -> miette::Result<()> {
        let img = super::load_image(&self.file).await?;
        let m = Mach::new(&img).map_err(|err| miette::miette!("{err}"))?;

        m.each_page(|base, bytes| {
            for (row, chunk) in bytes.chunks(16).enumerate() {
                let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
                let ascii: String = chunk
                    .iter()
                    .map(|&b| {
                        if (0x20..0x7f).contains(&b) {
                            b as char
                        } else {
                            '.'
                        }
                    })
                    .collect();
                println!(
                    "{:#010x}  {:<47}  |{ascii}|",
                    base as usize + row * 16,
                    hex.join(" ")
                );
            }
        });
        println!();
        println!("{m}");
        Ok(())
    }
}
