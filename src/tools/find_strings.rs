use crate::{load_context, Args};

use rdasm_core::strings;

use anyhow::Result;

pub fn find_strings(args: &Args) -> Result<()> {
    let ctx = load_context(args)?;
    let found = strings::find_strings(ctx.space(), ctx.config().min_string);
    for (address, string) in &found {
        println!(
            "{address:08x} {:<10} {:?}",
            string.kind.to_string(),
            string.value
        );
    }
    println!("{} strings", found.len());
    Ok(())
}
