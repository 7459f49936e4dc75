//! RouteViews prefix-to-AS snapshot parsing.
//!
//! Snapshots are published per address family and day as
//! `routeviews-{rv2|rv6}-{YYYYMMDD}.pfx2as.gz`, one prefix per line:
//!
//! ```text
//! 1.0.0.0	24	13335
//! 1.0.4.0	22	38803
//! 2.56.160.0	22	35007_213366
//! ```
//!
//! The third column is the origin. Multi-origin announcements are joined with
//! `_` and AS sets with `,`; only the first ASN is used.

use anyhow::{anyhow, Context, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Default directory of RouteViews prefix-to-AS snapshots
pub const DEFAULT_PREFIX2AS_DIR: &str = "cache_dir/routeviews-prefix2as";

/// Address family of a snapshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Families in processing order
    pub const ALL: [AddressFamily; 2] = [AddressFamily::Ipv4, AddressFamily::Ipv6];

    /// RouteViews dataset name of the family
    pub fn routeviews_class(&self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "rv2",
            AddressFamily::Ipv6 => "rv6",
        }
    }

    /// Path of the snapshot for `day` under `dir`.
    pub fn snapshot_path(&self, dir: &Path, day: &str) -> PathBuf {
        dir.join(format!(
            "routeviews-{}-{}.pfx2as.gz",
            self.routeviews_class(),
            day
        ))
    }
}

impl Display for AddressFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// A single prefix-to-origin entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pfx2asLine {
    pub prefix: IpNet,
    pub origin_asn: u32,
}

/// Extract the authoritative origin ASN from the origin column.
///
/// `64501_64502,64503` yields 64501: the first `_` separated origin, then the
/// first member of that origin's AS set.
pub fn parse_origin_asn(field: &str) -> Result<u32> {
    let first = field
        .split('_')
        .next()
        .and_then(|s| s.split(',').next())
        .unwrap_or(field);
    first
        .parse::<u32>()
        .map_err(|e| anyhow!("invalid ASN {:?}: {}", field, e))
}

/// Parse one tab separated snapshot line.
pub fn parse_line(line: &str) -> Result<Pfx2asLine> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 3 {
        return Err(anyhow!(
            "expected 3 tab separated columns, found {}: {:?}",
            fields.len(),
            line
        ));
    }

    let origin_asn = parse_origin_asn(fields[2])?;
    let prefix = format!("{}/{}", fields[0], fields[1])
        .parse::<IpNet>()
        .map_err(|e| anyhow!("invalid net {}/{}: {}", fields[0], fields[1], e))?
        .trunc();

    Ok(Pfx2asLine { prefix, origin_asn })
}

/// Streaming reader over a snapshot file.
///
/// Yields one `Result` per non-blank line; the caller decides how to treat
/// errors.
pub struct Pfx2asReader<R: BufRead> {
    lines: std::io::Lines<R>,
    line_no: usize,
}

impl Pfx2asReader<BufReader<Box<dyn std::io::Read + Send>>> {
    /// Open a snapshot; gzip/bzip2 compression is detected from the extension.
    pub fn open(path: &Path) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("non UTF-8 path {}", path.display()))?;
        let reader = oneio::get_reader(path_str)
            .map_err(|e| anyhow!("unable to open {}: {}", path_str, e))?;
        Ok(Pfx2asReader::new(BufReader::new(reader)))
    }
}

impl<R: BufRead> Pfx2asReader<R> {
    pub fn new(reader: R) -> Self {
        Pfx2asReader {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Number of lines read so far, blank ones included
    pub fn line_no(&self) -> usize {
        self.line_no
    }
}

impl<R: BufRead> Iterator for Pfx2asReader<R> {
    type Item = Result<Pfx2asLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    return Some(
                        Err(e).with_context(|| format!("read error after line {}", self.line_no)),
                    )
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let line_no = self.line_no;
            return Some(parse_line(&line).with_context(|| format!("line {}", line_no)));
        }
    }
}
