//! The `point.ini` goal file: a single line `lat lon radius`.

use std::fs;
use std::io;
use std::path::Path;

pub fn read_point(path: &Path) -> io::Result<(f64, f64, f64)> {
    let content = fs::read_to_string(path)?;
    parse_point(&content)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "expected 'lat lon radius'"))
}

pub fn write_point(path: &Path, lat: f64, lon: f64, radius_m: f64) -> io::Result<()> {
    fs::write(path, format!("{lat:.7} {lon:.7} {radius_m:.2}\n"))
}

fn parse_point(content: &str) -> Option<(f64, f64, f64)> {
    let mut fields = content.split_whitespace();
    let lat = fields.next()?.parse().ok()?;
    let lon = fields.next()?.parse().ok()?;
    let radius = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((lat, lon, radius))
}
