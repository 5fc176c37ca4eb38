use anyhow::{ensure, Context as _, Result};
use tracing::info;

use crate::context::Context;
use crate::segment::{SegmentBitness, SegmentPermission};

/// Turns the raw file of a [Context] into mapped and segmented memory.
pub trait Loader {
    fn name(&self) -> &str;

    fn load(&self, ctx: &mut Context) -> Result<()>;
}

/// Maps the whole file as a single segment at `base`.
#[derive(Clone, Debug)]
pub struct BinaryLoader {
    pub base: u64,
    pub perm: SegmentPermission,
    pub bitness: SegmentBitness,
    /// Exported as `start` if set
    pub entry: Option<u64>,
}

impl Default for BinaryLoader {
    fn default() -> Self {
        Self {
            base: 0,
            perm: SegmentPermission::R
                | SegmentPermission::W
                | SegmentPermission::X,
            bitness: SegmentBitness::S32Bits,
            entry: None,
        }
    }
}

impl BinaryLoader {
    pub fn new(base: u64) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    pub fn with_entry(mut self, entry: u64) -> Self {
        self.entry = Some(entry);
        self
    }
}

impl Loader for BinaryLoader {
    fn name(&self) -> &str {
        "binary"
    }

    fn load(&self, ctx: &mut Context) -> Result<()> {
        let size = ctx.space().file().len() as u64;
        ensure!(size > 0, "Cannot load an empty file");
        let end = self
            .base
            .checked_add(size)
            .with_context(|| format!("File too big for base {:#x}", self.base))?;

        ctx.map_file(0, self.base, end)?;
        ctx.add_segment("BINARY", self.base, end, self.perm, self.bitness)?;
        if let Some(entry) = self.entry {
            ensure!(
                ctx.set_entry(entry, "start"),
                "Entry point {entry:#x} outside of the file"
            );
        }
        info!(loader = self.name(), base = self.base, size, "file loaded");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;

    #[test]
    fn whole_file() {
        let mut ctx = Context::new(vec![0xC3; 0x10], Config::default());
        BinaryLoader::new(0x1000)
            .with_entry(0x1004)
            .load(&mut ctx)
            .unwrap();
        let segments = ctx.space().segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].address, 0x1000..0x1010);
        assert_eq!(segments[0].offset, Some(0..0x10));
        assert_eq!(ctx.space().get_u8(0x100F), Some(0xC3));
        assert_eq!(ctx.entry_points(), [0x1004]);
        assert_eq!(ctx.get_address("start"), Some(0x1004));
        assert_eq!(ctx.pending(), [0x1004]);
    }

    #[test]
    fn invalid() {
        let mut ctx = Context::new(vec![], Config::default());
        assert!(BinaryLoader::default().load(&mut ctx).is_err());

        let mut ctx = Context::new(vec![0; 4], Config::default());
        let loader = BinaryLoader::new(0x1000).with_entry(0x2000);
        assert!(loader.load(&mut ctx).is_err());

        let mut ctx = Context::new(vec![0; 4], Config::default());
        assert!(BinaryLoader::new(u64::MAX - 1).load(&mut ctx).is_err());
    }
}
