use std::io::Read;

use crate::MergeError;

/// Default maximum uncompressed size permitted for any single ZIP part inflated into memory.
pub(crate) const DEFAULT_MAX_ZIP_PART_BYTES: u64 = 256 * 1024 * 1024; // 256MiB

/// Default maximum total uncompressed bytes inflated for one package.
pub(crate) const DEFAULT_MAX_ZIP_TOTAL_BYTES: u64 = 512 * 1024 * 1024; // 512MiB

/// Case-, separator- and leading-slash-insensitive comparison of ZIP entry names.
pub(crate) fn zip_part_names_equivalent(a: &str, b: &str) -> bool {
    fn normalized(s: &str) -> impl Iterator<Item = u8> + '_ {
        s.bytes()
            .skip_while(|b| matches!(b, b'/' | b'\\'))
            .map(|b| if b == b'\\' { b'/' } else { b.to_ascii_lowercase() })
    }
    normalized(a).eq(normalized(b))
}

pub(crate) struct ZipInflateBudget {
    max_total_bytes: u64,
    used_bytes: u64,
}

impl ZipInflateBudget {
    pub(crate) fn new(max_total_bytes: u64) -> Self {
        Self {
            max_total_bytes,
            used_bytes: 0,
        }
    }

    fn remaining_bytes(&self) -> u64 {
        self.max_total_bytes.saturating_sub(self.used_bytes)
    }
}

/// Inflates one entry, enforcing the per-part limit and the shared package budget.
///
/// Declared sizes are not trusted: the read is capped at `limit + 1` bytes and the observed length
/// decides.
pub(crate) fn read_zip_file_bytes_with_budget<R: Read>(
    file: &mut R,
    part: &str,
    max_part_bytes: u64,
    budget: &mut ZipInflateBudget,
) -> Result<Vec<u8>, MergeError> {
    let remaining_total = budget.remaining_bytes();
    let effective_max = max_part_bytes.min(remaining_total);
    let limit_is_total = effective_max < max_part_bytes;

    let mut buf = Vec::new();
    let read_limit = effective_max.saturating_add(1);
    file.by_ref().take(read_limit).read_to_end(&mut buf)?;

    let observed = buf.len() as u64;
    if observed > effective_max {
        if limit_is_total {
            return Err(MergeError::PackageTooLarge {
                total: budget.used_bytes.saturating_add(observed),
                max: budget.max_total_bytes,
            });
        }
        return Err(MergeError::PartTooLarge {
            part: part.to_string(),
            size: observed,
            max: max_part_bytes,
        });
    }

    budget.used_bytes = budget.used_bytes.saturating_add(observed);
    Ok(buf)
}
