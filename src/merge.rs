//! Combines the allocated-area lists of a backup chain (a disk and its chain
//! of earlier backups) into the set of areas that must be read to reconstruct
//! the union of everything ever allocated across the chain.

use std::path::Path;

use crate::area::{DataArea, DiskParser};
use crate::error::{Result, VhdxRsError};
use crate::vhd::VhdParser;
use crate::vhdx::VhdxParser;

/// Splits every area into fixed-size `unit`-MiB chunks, in place.
///
/// Only triggers if the *first* area's length happens to already be a
/// multiple of `unit` — if it isn't, the whole list is left untouched, even
/// though later entries might still need realigning. Every entry that does
/// get walked is split blindly into `unit`-sized pieces regardless of its own
/// divisibility, so a trailing remainder shorter than `unit` is silently
/// dropped rather than kept as a short last chunk. Both quirks match this
/// function's long-standing behavior and are preserved deliberately.
pub fn align(areas: &mut Vec<DataArea>, unit: u32) -> Result<()> {
    if unit < 1 || unit > 256 {
        return Err(VhdxRsError::Unsupported("alignment unit must be in [1, 256] MiB".into()));
    }
    if areas.is_empty() {
        return Ok(());
    }
    if areas[0].length % unit != 0 {
        return Ok(());
    }

    let mut idx = 0;
    while idx < areas.len() {
        let entry = areas[idx];
        let start = entry.offset + unit;
        let end = entry.offset + entry.length;

        let mut chunks = Vec::new();
        let mut i = start;
        while i < end {
            chunks.push(DataArea::new(i, unit));
            i += unit;
        }

        areas[idx].length = unit;
        let insert_at = idx + 1;
        let chunk_count = chunks.len();
        areas.splice(insert_at..insert_at, chunks);
        idx = insert_at + chunk_count;
    }

    Ok(())
}

/// Merges two lists already sorted by offset into one, by ascending offset.
/// `fresh` is the area list just read from the current image; `accumulated`
/// is everything merged from the chain so far. On a tied offset, the
/// accumulated side's copy is kept.
pub fn union(fresh: &[DataArea], accumulated: &[DataArea]) -> Vec<DataArea> {
    let mut result = Vec::with_capacity(fresh.len() + accumulated.len());
    let mut i = 0;
    let mut j = 0;

    while i < fresh.len() && j < accumulated.len() {
        if accumulated[j].offset > fresh[i].offset {
            result.push(fresh[i]);
            i += 1;
        } else if accumulated[j].offset < fresh[i].offset {
            result.push(accumulated[j]);
            j += 1;
        } else {
            result.push(accumulated[j]);
            i += 1;
            j += 1;
        }
    }

    result.extend_from_slice(&fresh[i..]);
    result.extend_from_slice(&accumulated[j..]);
    result
}

/// Merges every pair of adjacent areas whose end touches the next one's
/// start. Only ever called once, after the whole chain has been folded
/// together, never between individual merge steps.
pub fn coalesce(areas: &mut Vec<DataArea>) {
    if areas.len() < 2 {
        return;
    }

    let mut second = 0;
    let mut first = 1;
    while first < areas.len() {
        if areas[second].end() == areas[first].offset {
            areas[second].length += areas[first].length;
            areas.remove(first);
        } else {
            first += 1;
            second += 1;
        }
    }
}

/// Walks a backup chain of images of a single known parser type, folding
/// each image's allocated areas into a running union, and coalesces the
/// result exactly once at the end.
pub fn get_backup_disks_blocks<P: DiskParser>(paths: &[impl AsRef<Path>]) -> Result<Vec<DataArea>> {
    let mut areas: Vec<DataArea> = Vec::new();
    let mut unit: u32 = 0;

    for path in paths {
        let parser = P::open(path)?;
        let mut fresh = parser.enumerate_areas()?;
        parser.close()?;

        if fresh.is_empty() {
            continue;
        }

        if unit == 0 {
            unit = fresh[0].length;
            areas = fresh;
            continue;
        }

        let front_length = fresh[0].length;
        if front_length > unit {
            align(&mut fresh, unit)?;
        } else if front_length < unit {
            unit = front_length;
            align(&mut areas, unit)?;
        }

        areas = union(&fresh, &areas);
    }

    coalesce(&mut areas);
    Ok(areas)
}

/// Dispatches `open`/`close`/`enumerate_areas` across whichever of the two
/// supported image formats a path turns out to hold, so a chain can mix VHD
/// and VHDX images freely.
enum AnyParser {
    Vhd(VhdParser),
    Vhdx(VhdxParser),
}

impl AnyParser {
    fn open(path: impl AsRef<Path>) -> Result<Self> {
        if is_vhdx(path.as_ref())? {
            Ok(Self::Vhdx(VhdxParser::open(path)?))
        } else {
            Ok(Self::Vhd(VhdParser::open(path)?))
        }
    }

    fn close(self) -> Result<()> {
        match self {
            Self::Vhd(p) => p.close(),
            Self::Vhdx(p) => p.close(),
        }
    }

    fn enumerate_areas(&self) -> Result<Vec<DataArea>> {
        match self {
            Self::Vhd(p) => p.enumerate_areas(),
            Self::Vhdx(p) => p.enumerate_areas(),
        }
    }
}

fn is_vhdx(path: &Path) -> Result<bool> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 8];
    if file.read_exact(&mut magic).is_err() {
        return Ok(false);
    }
    Ok(&magic == b"vhdxfile")
}

/// Format-autodetecting convenience wrapper: walks a chain of image paths
/// that may mix VHD and VHDX images, sniffing each path's format before
/// opening it.
pub fn merge_backup_chain(paths: &[impl AsRef<Path>]) -> Result<Vec<DataArea>> {
    let mut areas: Vec<DataArea> = Vec::new();
    let mut unit: u32 = 0;

    for path in paths {
        let parser = AnyParser::open(path)?;
        let mut fresh = parser.enumerate_areas()?;
        parser.close()?;

        if fresh.is_empty() {
            continue;
        }

        if unit == 0 {
            unit = fresh[0].length;
            areas = fresh;
            continue;
        }

        let front_length = fresh[0].length;
        if front_length > unit {
            align(&mut fresh, unit)?;
        } else if front_length < unit {
            unit = front_length;
            align(&mut areas, unit)?;
        }

        areas = union(&fresh, &areas);
    }

    coalesce(&mut areas);
    Ok(areas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn align_splits_every_entry_once_first_entry_is_divisible() {
        let mut areas = vec![DataArea::new(0, 4), DataArea::new(10, 6)];
        align(&mut areas, 2).unwrap();
        assert_eq!(
            vec![
                DataArea::new(0, 2),
                DataArea::new(2, 2),
                DataArea::new(10, 2),
                DataArea::new(12, 2),
                DataArea::new(14, 2),
            ],
            areas
        );
    }

    #[test]
    fn align_is_a_no_op_when_first_entry_is_not_divisible() {
        let mut areas = vec![DataArea::new(0, 3), DataArea::new(10, 4)];
        align(&mut areas, 2).unwrap();
        assert_eq!(vec![DataArea::new(0, 3), DataArea::new(10, 4)], areas);
    }

    #[test]
    fn union_prefers_accumulated_side_on_tie() {
        let fresh = vec![DataArea::new(0, 9), DataArea::new(4, 1)];
        let accumulated = vec![DataArea::new(0, 1), DataArea::new(2, 1)];
        let result = union(&fresh, &accumulated);
        assert_eq!(
            vec![DataArea::new(0, 1), DataArea::new(2, 1), DataArea::new(4, 1)],
            result
        );
    }

    #[test]
    fn coalesce_merges_touching_areas() {
        let mut areas = vec![DataArea::new(0, 2), DataArea::new(2, 2), DataArea::new(5, 1)];
        coalesce(&mut areas);
        assert_eq!(vec![DataArea::new(0, 4), DataArea::new(5, 1)], areas);
    }

    #[test]
    fn coalesce_leaves_gapped_areas_separate() {
        let mut areas = vec![DataArea::new(0, 1), DataArea::new(5, 1)];
        coalesce(&mut areas);
        assert_eq!(vec![DataArea::new(0, 1), DataArea::new(5, 1)], areas);
    }

    /// Folds a two-image chain the way `merge_backup_chain`/`get_backup_disks_blocks`
    /// do, without going through a `DiskParser`: image A's coarser unit gets
    /// realigned down to image B's finer one, the two lists union with no
    /// duplication (B's entries already appear in A's realignment), and a
    /// final coalesce recombines the touching pieces back into A's own shape.
    #[test]
    fn folds_a_two_image_chain_to_a_finer_unit_and_back() {
        let mut areas = vec![DataArea::new(0, 4), DataArea::new(8, 4)];
        let mut unit = areas[0].length;

        let fresh = vec![DataArea::new(2, 1), DataArea::new(9, 1)];
        let front_length = fresh[0].length;
        assert!(front_length < unit);
        unit = front_length;
        align(&mut areas, unit).unwrap();
        assert_eq!(
            vec![
                DataArea::new(0, 1),
                DataArea::new(1, 1),
                DataArea::new(2, 1),
                DataArea::new(3, 1),
                DataArea::new(8, 1),
                DataArea::new(9, 1),
                DataArea::new(10, 1),
                DataArea::new(11, 1),
            ],
            areas
        );

        areas = union(&fresh, &areas);
        coalesce(&mut areas);
        assert_eq!(vec![DataArea::new(0, 4), DataArea::new(8, 4)], areas);
    }
}
