//! Peer address normalization.

use std::net::Ipv6Addr;

use crate::error::{ParseError, ParseResult};

/// Split `host:port` or `[host]:port` into host and port.
///
/// The port is not validated; an empty host or port is accepted.
pub fn split_host_port(hostport: &str) -> ParseResult<(&str, &str)> {
    let addr = || hostport.to_string();

    let Some(last_colon) = hostport.rfind(':') else {
        return Err(ParseError::MissingPort {
            addr: addr(),
        });
    };

    let (host, open_from, close_from) = if hostport.starts_with('[') {
        let Some(end) = hostport.find(']') else {
            return Err(ParseError::MissingBracket {
                addr: addr(),
            });
        };
        if end + 1 != last_colon {
            return Err(if end + 1 == hostport.len() {
                ParseError::MissingPort {
                    addr: addr(),
                }
            } else if hostport.as_bytes()[end + 1] == b':' {
                ParseError::TooManyColons {
                    addr: addr(),
                }
            } else {
                ParseError::MissingPort {
                    addr: addr(),
                }
            });
        }
        (&hostport[1..end], 1, end + 1)
    } else {
        let host = &hostport[..last_colon];
        if host.contains(':') {
            return Err(ParseError::TooManyColons {
                addr: addr(),
            });
        }
        (host, 0, 0)
    };

    if hostport[open_from..].contains('[') {
        return Err(ParseError::UnexpectedCharacter {
            addr: addr(),
            found: '[',
        });
    }
    if hostport[close_from..].contains(']') {
        return Err(ParseError::UnexpectedCharacter {
            addr: addr(),
            found: ']',
        });
    }

    Ok((host, &hostport[last_colon + 1..]))
}

/// Join host and port, bracketing hosts that contain a colon.
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Append `default_port` to `addr` when it has none.
///
/// An address that already carries a port is returned re-joined but
/// otherwise unchanged. If adding the port does not produce a valid address
/// the error from parsing the original input is returned. A bare host that
/// contains colons is only accepted when it is an IPv6 literal.
pub fn normalize_address(addr: &str, default_port: &str) -> ParseResult<String> {
    let original_err = match split_host_port(addr) {
        Ok((host, port)) => return Ok(join_host_port(host, port)),
        Err(e) => e,
    };

    let candidate = join_host_port(addr, default_port);
    match split_host_port(&candidate) {
        Ok((host, _)) if host.contains(':') && !is_ipv6_literal(host) => Err(original_err),
        Ok(_) => Ok(candidate),
        Err(_) => Err(original_err),
    }
}

fn is_ipv6_literal(host: &str) -> bool {
    let without_zone = host.split_once('%').map_or(host, |(ip, _)| ip);
    without_zone.parse::<Ipv6Addr>().is_ok()
}
