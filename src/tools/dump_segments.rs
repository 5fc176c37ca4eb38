use crate::{load_context, Args};

use anyhow::Result;

pub fn dump_segments(args: &Args) -> Result<()> {
    let ctx = load_context(args)?;
    let space = ctx.space();

    println!("Segments: ");
    for segment in space.segments() {
        let width = segment.bitness.hex_width();
        println!(
            "  {:<12} {:0width$x}..{:0width$x} {:?} {:?} file: {:x?}",
            segment.name,
            segment.address.start,
            segment.address.end,
            segment.perm,
            segment.kind,
            segment.offset,
        );
    }

    println!();
    println!("Mappings: ");
    for mapping in space.mappings() {
        println!("  {:x?} index {}", mapping.address, mapping.index);
    }
    let info = space.memory_info();
    println!();
    println!("Memory: {:#x}..{:#x} ({} bytes)", info.start, info.end, info.size);
    Ok(())
}
