use crate::{load_context, Args, DumpBytesArgs};

use anyhow::Result;

pub fn dump_bytes(args: &Args, bytes_args: &DumpBytesArgs) -> Result<()> {
    let ctx = load_context(args)?;
    let start = bytes_args.start.unwrap_or(args.base);
    let end = start.saturating_add(bytes_args.len);
    for address in start..end {
        match ctx.space().get_mbyte(address) {
            Some(word) => println!("{address:08x}: {word:?}"),
            None => println!("{address:08x}: unmapped"),
        }
    }
    Ok(())
}
