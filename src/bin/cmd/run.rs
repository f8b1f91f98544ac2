use miette::{miette, IntoDiagnostic};

/// Run an image and print each result machine
#[derive(clap::Args)]
pub struct Args {
    /// Program image (`.img`) or text source
    file: String,

    /// Input values, as `name=v,v,...`; may repeat
    #[clap(long)]
    input: Vec<String>,

    /// Print results as JSON
    #[clap(long)]
    json: bool,
}

impl Args {
    pub async fn exec(self) -> miette::Result<()> {
        let img = super::load_image(&self.file).await?;

        let mut inputs = Vec::new();
        for spec in &self.input {
            inputs.push(parse_input(spec)?);
        }

        let results = forkvm::run_collect(&img, &inputs).into_diagnostic()?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&results).into_diagnostic()?
            );
            return Ok(());
        }
        for res in &results {
            match &res.error {
                Some(err) => println!("machine {}: {err}", res.machine),
                None if res.values.is_empty() => println!("machine {}: ok", res.machine),
                None => {
                    let parts: Vec<String> = res
                        .values
                        .iter()
                        .map(|(name, vals)| format!("{name}={vals:?}"))
                        .collect();
                    println!("machine {}: {}", res.machine, parts.join(" "));
                }
            }
        }
        Ok(())
    }
}

fn parse_input(spec: &str) -> miette::Result<(String, Vec<u32>)> {
    let (name, rest) = spec
        .split_once('=')
        .ok_or_else(|| miette!("invalid --input {spec:?}, expected name=v,v,..."))?;
    let values = rest
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.trim().parse::<u32>())
        .collect::<Result<Vec<u32>, _>>()
        .map_err(|_| miette!("invalid --input values in {spec:?}"))?;
    Ok((name.to_owned(), values))
}
