use crate::{load_context, Args};

use rdasm_core::listing::ListingItemKind;
use rdasm_core::strings;

use anyhow::Result;

pub fn dump_listing(args: &Args) -> Result<()> {
    let mut ctx = load_context(args)?;
    // strings are the only thing a raw binary tells without a processor
    let found = strings::find_strings(ctx.space(), ctx.config().min_string);
    for (address, string) in found {
        ctx.set_type(address, string.kind, true);
    }

    let listing = ctx.listing();
    for item in listing.items() {
        let symbol = item.symbol.as_ref().map(|symbol| &symbol.value);
        match (item.kind, symbol) {
            (ListingItemKind::Segment, Some(name)) => {
                println!();
                println!("segment {name}");
            }
            (_, Some(name)) => println!("{:08x}  {name}:", item.address),
            (ListingItemKind::HexDump, None) => println!(
                "{:08x}  hexdump {} bytes",
                item.address,
                item.end - item.index
            ),
            (ListingItemKind::Fill, None) => println!(
                "{:08x}  fill {} bytes",
                item.address,
                item.end - item.index
            ),
            (kind, None) => println!("{:08x}  {kind:?}", item.address),
        }
        if let Some(data_type) = item.data_type {
            println!("{:08x}    {data_type}", item.address);
        }
    }
    Ok(())
}
