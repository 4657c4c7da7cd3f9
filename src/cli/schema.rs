use clap::Args;

use super::CliContext;
use chatflow::schema::write_schema;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Output directory, relative to the root. Default: schemas
    #[arg(long, default_value = "schemas")]
    pub out: String,
}

pub async fn execute(args: SchemaArgs, context: &CliContext) -> anyhow::Result<()> {
    let out_dir = context.root.join(&args.out);
    let written = write_schema(&out_dir)?;
    for name in &written {
        println!("  {}", name);
    }
    println!("Schemas written to {}", out_dir.display());
    Ok(())
}
