//! Free-space parsing for the storage listing returned by the probe.
//!
//! Two layouts are understood. A `df -h` row (filesystem, size, used,
//! available, use%, mount point) reports the fourth column as free space and
//! names the volume after the last segment of the mount point. Any other line
//! takes its last size token as free space and its last word as the name,
//! or its first word when the line ends in a size.
//! Unparseable lines are ignored, which folds parse failures into
//! "insufficient space".

use once_cell::sync::Lazy;
use patchfleet_model::DatastoreCapacity;
use regex::Regex;

static SIZE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+(?:\.\d+)?)([KMGTP])i?B?$")
        .expect("size token regex should compile")
});

/// Converts a human size token (`5G`, `512M`, `1.5T`, `10GiB`) to gigabytes.
pub fn parse_size_gb(token: &str) -> Option<f64> {
    let caps = SIZE_TOKEN.captures(token.trim())?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_ascii_uppercase();
    let factor = match unit.as_str() {
        "K" => 1.0 / (1024.0 * 1024.0),
        "M" => 1.0 / 1024.0,
        "G" => 1.0,
        "T" => 1024.0,
        "P" => 1024.0 * 1024.0,
        _ => return None,
    };
    Some(value * factor)
}

/// Parses one listing line into a named capacity.
pub fn parse_line(line: &str) -> Option<DatastoreCapacity> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }

    let df_row = tokens.len() >= 6
        && tokens[1..=3].iter().all(|t| parse_size_gb(t).is_some());
    if df_row {
        let free_gb = parse_size_gb(tokens[3])?;
        let mount = tokens[tokens.len() - 1];
        return Some(DatastoreCapacity {
            name: volume_name(mount),
            free_gb,
        });
    }

    let free_gb = tokens.iter().rev().find_map(|t| parse_size_gb(t))?;
    let last = tokens[tokens.len() - 1];
    let name = if parse_size_gb(last).is_some() {
        tokens[0]
    } else {
        last
    };
    Some(DatastoreCapacity {
        name: volume_name(name),
        free_gb,
    })
}

/// First volume whose free space is strictly above `min_free_gb`.
pub fn select_datastore<S: AsRef<str>>(
    lines: &[S],
    min_free_gb: f64,
) -> Option<DatastoreCapacity> {
    lines
        .iter()
        .filter_map(|line| parse_line(line.as_ref()))
        .find(|capacity| capacity.free_gb > min_free_gb)
}

fn volume_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn df_row_reports_available_column() {
        let capacity =
            parse_line("vmfs 10G 5G 5G 50% /vmfs/volumes/datastore1").unwrap();
        assert_eq!(capacity.name, "datastore1");
        assert!((capacity.free_gb - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn threshold_is_strict() {
        let lines = [
            "VMFS-6 20G 19G 1G 95% /vmfs/volumes/small",
            "VMFS-6 50G 48G 2G 96% /vmfs/volumes/edge",
            "VMFS-6 100G 20G 80G 20% /vmfs/volumes/big",
        ];
        let chosen = select_datastore(&lines, 2.0).unwrap();
        assert_eq!(chosen.name, "big");
    }

    #[test]
    fn one_gigabyte_free_is_insufficient() {
        let lines = ["vmfs 10G 9G 1G 90% /vmfs/volumes/datastore1"];
        assert!(select_datastore(&lines, 2.0).is_none());
    }

    #[test]
    fn units_convert_to_gigabytes() {
        assert_eq!(parse_size_gb("512M"), Some(0.5));
        assert_eq!(parse_size_gb("1.5T"), Some(1536.0));
        assert_eq!(parse_size_gb("3GiB"), Some(3.0));
        assert_eq!(parse_size_gb("7g"), Some(7.0));
        assert_eq!(parse_size_gb("50%"), None);
        assert_eq!(parse_size_gb("datastore1"), None);
    }

    #[test]
    fn free_form_line_uses_last_size_token() {
        let capacity = parse_line("datastore2 free 12.5G").unwrap();
        assert_eq!(capacity.name, "datastore2");
        assert!((capacity.free_gb - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn garbage_folds_into_no_selection() {
        let lines = ["", "grep: no match", "Filesystem Size Used Avail Use% Mounted"];
        assert!(select_datastore(&lines, 2.0).is_none());
    }
}
