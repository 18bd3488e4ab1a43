//! Configuration from environment variables.

use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::model::Role;

/// Socket address to bind the server to. Reads `PORT`, defaults to 8080,
/// binds to 0.0.0.0.
pub fn server_addr() -> SocketAddr {
    let port = env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(8080);
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

/// Directory of client assets served at `/`.
/// Order: `STATIC_DIR` env var, then `./static`.
pub fn static_dir() -> PathBuf {
    if let Ok(p) = env::var("STATIC_DIR") {
        return PathBuf::from(p);
    }
    Path::new("./static").to_path_buf()
}

/// Battle-map grid bounds in cells, `SHADOWMAR_GRID_BOUNDS` as `WxH`.
/// Defaults to 30x30; `none` disables bounds checking entirely.
pub fn grid_bounds() -> Option<(u32, u32)> {
    match env::var("SHADOWMAR_GRID_BOUNDS") {
        Ok(v) if v.eq_ignore_ascii_case("none") => None,
        Ok(v) => parse_bounds(&v).or(Some((30, 30))),
        Err(_) => Some((30, 30)),
    }
}

fn parse_bounds(v: &str) -> Option<(u32, u32)> {
    let (w, h) = v.split_once(['x', 'X'])?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Campaign logins: one DM and one shared player account, passwords
/// overridable by env. The defaults only make sense for local play.
pub fn accounts() -> Vec<(String, String, Role)> {
    let dm_password = env::var("SHADOWMAR_DM_PASSWORD").unwrap_or_else(|_| "password".into());
    let player_password =
        env::var("SHADOWMAR_PLAYER_PASSWORD").unwrap_or_else(|_| "password".into());
    vec![
        ("dm".to_string(), dm_password, Role::Dm),
        ("player".to_string(), player_password, Role::Player),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_parse() {
        assert_eq!(parse_bounds("30x30"), Some((30, 30)));
        assert_eq!(parse_bounds("40X20"), Some((40, 20)));
        assert_eq!(parse_bounds("40"), None);
        assert_eq!(parse_bounds("ax b"), None);
    }
}
