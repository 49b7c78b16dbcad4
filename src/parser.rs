/// `docker stats` log parsing.
///
/// A log file is the output of a loop like `date -Iseconds; docker stats
/// --no-stream`: a timestamp line followed by a table whose header row is
/// reprinted on every refresh. Each data row becomes a [`MetricRecord`]
/// stamped with the most recent timestamp line.
use crate::record::{normalize_timestamp, MetricRecord};
use crate::units::{is_plain_decimal, to_mib, UnitError};
use regex::{Captures, Regex};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// `YYYY-MM-DD` followed by the 15 characters of `Thh:mm:ss+hh:mm`.
static TIMESTAMP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}.{15}").unwrap());

/// One row of the fixed-width `docker stats` table.
static DATA_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<id>.{12}) {2,}(?P<name>[^ ]+) {2,}(?P<cpu>[^ ]+)% {2,}(?P<usage>[^ ]+) / (?P<limit>[^ ]+) {2,}(?P<mem>[^ ]+)% {2,}",
    )
    .unwrap()
});

/// Id column text of the header row.
const HEADER_ID: &str = "CONTAINER ID";

/// What went wrong while parsing a log file.
#[derive(Debug)]
pub enum ParseErrorKind {
    FileOpen(std::io::Error),
    Read(std::io::Error),
    MalformedTimestamp {
        value: String,
        source: chrono::ParseError,
    },
    /// Size or percentage token that could not be read as a number, or a
    /// size with an unsupported unit.
    Quantity(UnitError),
}

impl From<UnitError> for ParseErrorKind {
    fn from(e: UnitError) -> Self {
        ParseErrorKind::Quantity(e)
    }
}

/// A parse failure, located by file and (once reading started) line.
#[derive(Debug)]
pub struct ParseError {
    pub path: PathBuf,
    pub line: Option<usize>,
    pub kind: ParseErrorKind,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: ", self.path.display(), line)?,
            None => write!(f, "{}: ", self.path.display())?,
        }
        match &self.kind {
            ParseErrorKind::FileOpen(e) => write!(f, "failed to open file: {e}"),
            ParseErrorKind::Read(e) => write!(f, "failed to read line: {e}"),
            ParseErrorKind::MalformedTimestamp { value, source } => {
                write!(f, "failed to parse timestamp {value:?}: {source}")
            }
            ParseErrorKind::Quantity(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ParseErrorKind::FileOpen(e) | ParseErrorKind::Read(e) => Some(e),
            ParseErrorKind::MalformedTimestamp { source, .. } => Some(source),
            ParseErrorKind::Quantity(e) => Some(e),
        }
    }
}

/// Open a log file for lazy parsing.
pub fn open(path: &Path) -> Result<LogParser<BufReader<File>>, ParseError> {
    let file = File::open(path).map_err(|e| ParseError {
        path: path.to_path_buf(),
        line: None,
        kind: ParseErrorKind::FileOpen(e),
    })?;
    Ok(LogParser::new(BufReader::new(file), path))
}

/// Lazy, single-pass parser over one log.
///
/// Yields records in line order. After the first error it yields nothing
/// more, since a format problem in one line means the rest of the file
/// can't be trusted either.
pub struct LogParser<R> {
    reader: R,
    buf: Vec<u8>,
    path: PathBuf,
    line_no: usize,
    current_timestamp: String,
    failed: bool,
}

impl<R: BufRead> LogParser<R> {
    pub fn new(reader: R, path: impl Into<PathBuf>) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            path: path.into(),
            line_no: 0,
            current_timestamp: String::new(),
            failed: false,
        }
    }

    /// Next line without its terminator, or `None` at end of input.
    ///
    /// Bytes that aren't UTF-8 are replaced, so a stray binary line falls
    /// through to the no-match path instead of failing the file.
    fn read_line(&mut self) -> Option<std::io::Result<String>> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.ends_with(b"\n") {
                    self.buf.pop();
                    if self.buf.ends_with(b"\r") {
                        self.buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(e) => Some(Err(e)),
        }
    }

    /// Returns `Ok(None)` for timestamp lines and lines that are not data rows.
    fn parse_line(&mut self, line: &str) -> Result<Option<MetricRecord>, ParseErrorKind> {
        if let Some(m) = TIMESTAMP_PATTERN.find(line) {
            let value = m.as_str();
            self.current_timestamp =
                normalize_timestamp(value).map_err(|source| ParseErrorKind::MalformedTimestamp {
                    value: value.to_string(),
                    source,
                })?;
            return Ok(None);
        }

        let Some(caps) = DATA_PATTERN.captures(line) else {
            return Ok(None);
        };

        if &caps["id"] == HEADER_ID {
            return Ok(None);
        }

        build_record(&caps, &self.current_timestamp).map(Some)
    }
}

fn build_record(caps: &Captures<'_>, timestamp: &str) -> Result<MetricRecord, ParseErrorKind> {
    Ok(MetricRecord {
        timestamp: timestamp.to_string(),
        container_id: caps["id"].to_string(),
        container_name: caps["name"].to_string(),
        cpu_percentage: parse_percentage(&caps["cpu"])?,
        memory_usage_mib: to_mib(&caps["usage"])?,
        memory_limit_mib: to_mib(&caps["limit"])?,
        memory_percentage: parse_percentage(&caps["mem"])?,
    })
}

/// Percentages share the size columns' number format: no sign, exponent or
/// `NaN`/`inf` spellings.
fn parse_percentage(token: &str) -> Result<f64, UnitError> {
    let malformed = || UnitError::MalformedQuantity {
        token: token.to_string(),
    };
    if !is_plain_decimal(token) {
        return Err(malformed());
    }
    token.parse().map_err(|_| malformed())
}

impl<R: BufRead> Iterator for LogParser<R> {
    type Item = Result<MetricRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let line = self.read_line()?;
            self.line_no += 1;
            let parsed = match line {
                Ok(line) => self.parse_line(&line),
                Err(e) => Err(ParseErrorKind::Read(e)),
            };
            match parsed {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(kind) => {
                    self.failed = true;
                    return Some(Err(ParseError {
                        path: self.path.clone(),
                        line: Some(self.line_no),
                        kind,
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = "CONTAINER ID        NAME                CPU %               MEM USAGE / LIMIT     MEM %               NET I/O             BLOCK I/O           PIDS";

    fn fixture_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata/2019-11-01.log")
    }

    fn parse_str(input: &str) -> Vec<Result<MetricRecord, ParseError>> {
        LogParser::new(Cursor::new(input.to_string()), "inline.log").collect()
    }

    fn parse_ok(input: &str) -> Vec<MetricRecord> {
        parse_str(input)
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn row(id: &str, name: &str, cpu: &str, usage: &str, limit: &str, mem: &str) -> String {
        format!(
            "{id:<20}{name:<20}{cpu:<20}{:<22}{mem:<20}1.29kB / 0B         0B / 0B             2",
            format!("{usage} / {limit}")
        )
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn header_row_produces_nothing() {
        assert!(parse_ok(HEADER).is_empty());
    }

    #[test]
    fn header_shaped_like_data_is_skipped() {
        // Would fail unit normalization if it were treated as data.
        let line = "CONTAINER ID  NAME  CPU%  USAGE / LIMIT  MEM%  PIDS";
        assert!(parse_ok(line).is_empty());
    }

    #[test]
    fn header_after_terminal_reset_is_skipped() {
        let line = format!("\u{1b}[2J\u{1b}[H{HEADER}");
        assert!(parse_ok(&line).is_empty());
    }

    #[test]
    fn blank_and_banner_lines_are_skipped() {
        let input = "\n   \nstarting docker stats capture\n";
        assert!(parse_ok(input).is_empty());
    }

    #[test]
    fn data_row_fields() {
        let input = format!(
            "2019-11-01T15:16:59+01:00\n{HEADER}\n{}\n",
            row(
                "0c783358576b",
                "single-proxy",
                "0.00%",
                "2.723MiB",
                "1.953GiB",
                "0.14%"
            )
        );
        let records = parse_ok(&input);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.timestamp, "2019-11-01 15:16:59.000000");
        assert_eq!(r.container_id, "0c783358576b");
        assert_eq!(r.container_name, "single-proxy");
        assert_eq!(r.cpu_percentage, 0.0);
        assert!(approx(r.memory_usage_mib, 2.723));
        assert!(approx(r.memory_limit_mib, 1999.872));
        assert!(approx(r.memory_percentage, 0.14));
    }

    #[test]
    fn bytes_usage_is_normalized() {
        let input = format!(
            "2019-11-01T15:16:59+01:00\n{}\n",
            row("aaaaaaaaaaaa", "stopped", "0.00%", "0B", "0B", "0.00%")
        );
        let records = parse_ok(&input);
        assert_eq!(records[0].memory_usage_mib, 0.0);
        assert_eq!(records[0].memory_limit_mib, 0.0);
    }

    #[test]
    fn data_before_timestamp_has_empty_timestamp() {
        let input = format!(
            "{}\n2019-11-01T15:17:06+01:00\n{}\n",
            row("aaaaaaaaaaaa", "early", "1.00%", "1MiB", "1GiB", "0.10%"),
            row("aaaaaaaaaaaa", "early", "2.00%", "1MiB", "1GiB", "0.10%"),
        );
        let records = parse_ok(&input);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, "");
        assert_eq!(records[1].timestamp, "2019-11-01 15:17:06.000000");
    }

    #[test]
    fn unknown_unit_stops_parsing_with_line_number() {
        let input = format!(
            "2019-11-01T15:16:59+01:00\n{}\n{}\n{}\n",
            row("aaaaaaaaaaaa", "ok", "1.00%", "1MiB", "1GiB", "0.10%"),
            row("bbbbbbbbbbbb", "drift", "1.00%", "5KiB", "1GiB", "0.10%"),
            row("cccccccccccc", "never", "1.00%", "1MiB", "1GiB", "0.10%"),
        );
        let results = parse_str(&input);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.line, Some(3));
        assert!(matches!(
            err.kind,
            ParseErrorKind::Quantity(UnitError::UnrecognizedUnit { .. })
        ));
        assert!(err.to_string().starts_with("inline.log:3: "));
    }

    #[test]
    fn malformed_percentage_is_an_error() {
        let input = row("aaaaaaaaaaaa", "odd", "n/a%", "1MiB", "1GiB", "0.10%");
        let results = parse_str(&input);
        assert!(matches!(
            results[0].as_ref().unwrap_err().kind,
            ParseErrorKind::Quantity(UnitError::MalformedQuantity { .. })
        ));
    }

    #[test]
    fn non_finite_percentages_are_rejected() {
        for (cpu, mem) in [("NaN%", "0.10%"), ("1.00%", "inf%"), ("-5%", "0.10%"), ("1e3%", "0.10%")] {
            let input = format!(
                "2019-11-01T15:16:59+01:00\n{}\n",
                row("aaaaaaaaaaaa", "odd", cpu, "1MiB", "1GiB", mem)
            );
            let results = parse_str(&input);
            assert_eq!(results.len(), 1, "{cpu} {mem}");
            let err = results[0].as_ref().unwrap_err();
            assert_eq!(err.line, Some(2));
            assert!(
                matches!(
                    err.kind,
                    ParseErrorKind::Quantity(UnitError::MalformedQuantity { .. })
                ),
                "{cpu} {mem}"
            );
        }
    }

    #[test]
    fn invalid_utf8_line_is_skipped() {
        let mut bytes = b"caf\xe9 log rotated\n\xff\xfe\x00\n".to_vec();
        bytes.extend_from_slice(&std::fs::read(fixture_path()).unwrap());

        let results: Vec<_> = LogParser::new(Cursor::new(bytes), "rotated.log").collect();
        assert_eq!(results.len(), 15);
        let records: Vec<MetricRecord> = results.into_iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(records[0].container_name, "single-proxy");
        assert_eq!(records[14].timestamp, "2019-11-01 15:17:28.000000");
    }

    #[test]
    fn crlf_line_endings() {
        let input = format!(
            "2019-11-01T15:16:59+01:00\r\n{HEADER}\r\n{}\r\n",
            row("aaaaaaaaaaaa", "win", "1.00%", "1MiB", "1GiB", "0.10%")
        );
        let records = parse_ok(&input);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, "2019-11-01 15:16:59.000000");
        assert_eq!(records[0].container_name, "win");
    }

    #[test]
    fn read_error_fails_the_file() {
        struct Broken;
        impl std::io::Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk gone"))
            }
        }

        let results: Vec<_> = LogParser::new(BufReader::new(Broken), "broken.log").collect();
        assert_eq!(results.len(), 1);
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Read(_)));
        assert_eq!(err.line, Some(1));
    }

    #[test]
    fn malformed_timestamp_is_an_error() {
        let results = parse_str("2019-11-01T99:99:99+01:00\n");
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0].as_ref().unwrap_err().kind,
            ParseErrorKind::MalformedTimestamp { .. }
        ));
    }

    #[test]
    fn parses_fixture() {
        let records: Vec<MetricRecord> = open(&fixture_path())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 15);

        let timestamps = [
            "2019-11-01 15:16:59.000000",
            "2019-11-01 15:17:06.000000",
            "2019-11-01 15:17:14.000000",
            "2019-11-01 15:17:21.000000",
            "2019-11-01 15:17:28.000000",
        ];
        let cpu = [
            [0.00, 0.00, 0.01],
            [0.01, 0.01, 0.00],
            [0.00, 0.00, 0.01],
            [0.00, 0.00, 0.00],
            [0.00, 0.00, 0.00],
        ];
        let containers = [
            ("0c783358576b", "single-proxy", 2.723, 0.14),
            ("3b1681f84c07", "single-web", 31.96, 1.60),
            ("423306a17a71", "single-api", 47.65, 2.38),
        ];

        for (i, record) in records.iter().enumerate() {
            let (sample, c) = (i / 3, i % 3);
            let (id, name, usage, mem) = containers[c];
            assert_eq!(record.timestamp, timestamps[sample], "record {i}");
            assert_eq!(record.container_id, id, "record {i}");
            assert_eq!(record.container_name, name, "record {i}");
            assert!(approx(record.cpu_percentage, cpu[sample][c]), "record {i}");
            assert!(approx(record.memory_usage_mib, usage), "record {i}");
            assert!(approx(record.memory_limit_mib, 1999.872), "record {i}");
            assert!(approx(record.memory_percentage, mem), "record {i}");
        }
    }

    #[test]
    fn open_missing_file() {
        let err = open(Path::new("/nonexistent/stats.log")).err().unwrap();
        assert_eq!(err.line, None);
        assert!(matches!(err.kind, ParseErrorKind::FileOpen(_)));
    }

    #[test]
    fn each_parser_starts_fresh() {
        let first = parse_ok(&format!(
            "2019-11-01T15:16:59+01:00\n{}\n",
            row("aaaaaaaaaaaa", "a", "1.00%", "1MiB", "1GiB", "0.10%")
        ));
        let second = parse_ok(&row("aaaaaaaaaaaa", "a", "1.00%", "1MiB", "1GiB", "0.10%"));
        assert_eq!(first[0].timestamp, "2019-11-01 15:16:59.000000");
        assert_eq!(second[0].timestamp, "");
    }
}
