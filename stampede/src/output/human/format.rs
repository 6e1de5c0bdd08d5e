use std::time::Duration;

pub(crate) fn format_bytes(b: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    if b >= GIB {
        return format!("{:.2}GiB", (b as f64) / (GIB as f64));
    }
    if b >= MIB {
        return format!("{:.2}MiB", (b as f64) / (MIB as f64));
    }
    if b >= KIB {
        return format!("{:.2}KiB", (b as f64) / (KIB as f64));
    }

    format!("{b}B")
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.1}")
    } else {
        "0".to_string()
    }
}

pub(crate) fn format_percent(ratio: f64) -> String {
    format!("{:.2}%", ratio * 100.0)
}

/// Render a millisecond trend value with a unit that keeps two to four significant digits.
pub(crate) fn format_millis(ms: f64) -> String {
    if !ms.is_finite() {
        return "n/a".to_string();
    }
    if ms >= 1000.0 {
        return format!("{:.2}s", ms / 1000.0);
    }
    if ms >= 1.0 {
        return format!("{ms:.2}ms");
    }
    format!("{:.0}us", ms * 1000.0)
}

/// Single rounded component (`ms` below one second, whole `s` above).
pub(crate) fn format_duration(d: Duration) -> String {
    if d >= Duration::from_secs(1) {
        return format!("{}s", (d.as_millis() + 500) / 1000);
    }
    format!("{}ms", d.as_millis())
}

pub(crate) fn format_tags_inline(tags: &[(String, String)], exclude: &[&str]) -> String {
    let mut filtered: Vec<&(String, String)> = tags
        .iter()
        .filter(|(k, _)| !exclude.contains(&k.as_str()))
        .collect();

    if filtered.is_empty() {
        return String::new();
    }
    filtered.sort();

    let inner = filtered
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");

    format!("{{{inner}}}")
}
