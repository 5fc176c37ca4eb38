use crate::{load_context, Args};

use anyhow::Result;

pub fn dump_symbols(args: &Args) -> Result<()> {
    let mut ctx = load_context(args)?;
    let listing = ctx.listing();

    println!("Symbols: ");
    for symbol in listing.symbols() {
        println!(
            "  {:08x} {:?} {}",
            symbol.address, symbol.kind, symbol.value
        );
    }
    println!();
    println!("Exports: ");
    for symbol in (0..listing.exports_len()).filter_map(|i| listing.get_export(i))
    {
        println!("  {:08x} {}", symbol.address, symbol.value);
    }
    println!();
    println!("Imports: ");
    for symbol in (0..listing.imports_len()).filter_map(|i| listing.get_import(i))
    {
        println!("  {:08x} {}", symbol.address, symbol.value);
    }
    Ok(())
}
