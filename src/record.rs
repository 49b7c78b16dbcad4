/// One `docker stats` observation of one container at one instant.
///
/// Memory values are always MiB; see [`crate::units::to_mib`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    /// `YYYY-MM-DD HH:MM:SS.ffffff`, or empty when no timestamp line preceded
    /// the data line.
    pub timestamp: String,
    pub container_id: String,
    pub container_name: String,
    pub cpu_percentage: f64,
    pub memory_usage_mib: f64,
    pub memory_limit_mib: f64,
    pub memory_percentage: f64,
}

/// Storage format for timestamps, microsecond padded.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Parse an RFC 3339 timestamp (`2019-11-01T15:16:59+01:00`) and render it in
/// [`TIMESTAMP_FORMAT`], keeping the wall-clock time of the source offset.
pub fn normalize_timestamp(raw: &str) -> Result<String, chrono::ParseError> {
    let parsed = chrono::DateTime::parse_from_rfc3339(raw)?;
    Ok(parsed.format(TIMESTAMP_FORMAT).to_string())
}
