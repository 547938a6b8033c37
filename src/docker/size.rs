//! Human-readable sizes as printed by `docker system df -v`

/// Binary multiplier for a size unit, `None` for anything unrecognised
fn unit_multiplier(unit: &str) -> Option<u64> {
    let unit = unit.to_ascii_uppercase();
    let unit = unit.strip_suffix('B').unwrap_or(&unit);
    let multiplier = match unit {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        _ => return None,
    };
    Some(multiplier)
}

/// Convert `"1.2GB"`, `"500MB"`, `"12kB"` or `"0B"` to bytes.
///
/// Unparsable input yields 0.
pub fn parse_size_to_bytes(size: &str) -> u64 {
    let size = size.trim();
    let split = size
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(size.len());
    let (number, unit) = size.split_at(split);

    if number.is_empty() {
        return 0;
    }
    let Ok(value) = number.parse::<f64>() else {
        return 0;
    };
    let Some(multiplier) = unit_multiplier(unit) else {
        return 0;
    };

    (value * multiplier as f64) as u64
}

/// Format bytes with binary multiples: `"512 B"`, `"1.5 KB"`, `"2.0 GB"`
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let suffix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", bytes as f64 / div as f64, suffix)
}
