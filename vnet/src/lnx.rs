//! Parses `.lnx` topology files.
//!
//! Each non-blank line describes one link of the node:
//!
//! ```text
//! localhost:5000 10.116.89.157 localhost:5001 10.10.168.73
//! ```
//!
//! The first pair is our physical address and our virtual address on the
//! link, the second pair is the neighbor's. Lines starting with `#` are
//! ignored.

use nom::{
    bytes::complete::take_till1,
    character::complete::{char, digit1, space0, space1},
    combinator::{all_consuming, map, map_res},
    error::{context, convert_error, VerboseError},
    sequence::{separated_pair, tuple},
    IResult,
};
use std::path::{Path, PathBuf};
use vnet_core::{
    link::{LinkConfig, PhysicalAddress},
    protocols::ipv4::Ipv4Address,
};

type Res<T, U> = IResult<T, U, VerboseError<T>>;

#[derive(Debug, thiserror::Error)]
pub enum LnxError {
    #[error("Could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Line {line}: {reason}")]
    Syntax { line: usize, reason: String },
    #[error("The file describes no links")]
    Empty,
}

/// Reads and parses the topology file at `path`.
pub async fn read_lnx(path: &Path) -> Result<Vec<LinkConfig>, LnxError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LnxError::Read {
            path: path.to_owned(),
            source,
        })?;
    parse_lnx(&text)
}

/// Parses the text of a topology file, one link per line.
pub fn parse_lnx(text: &str) -> Result<Vec<LinkConfig>, LnxError> {
    let links = text
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| parse_line(line).map_err(|reason| LnxError::Syntax { line: i + 1, reason }))
        .collect::<Result<Vec<_>, _>>()?;
    if links.is_empty() {
        Err(LnxError::Empty)?
    }
    Ok(links)
}

fn parse_line(line: &str) -> Result<LinkConfig, String> {
    match all_consuming(link)(line) {
        Ok((_, config)) => Ok(config),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(convert_error(line, e)),
        Err(nom::Err::Incomplete(_)) => Err("incomplete line".to_string()),
    }
}

/// A whole line: both ends of a link.
fn link(input: &str) -> Res<&str, LinkConfig> {
    map(
        tuple((space0, end, space1, end, space0)),
        |(_, (local, local_vip), _, (remote, remote_vip), _)| LinkConfig {
            local,
            local_vip,
            remote,
            remote_vip,
        },
    )(input)
}

/// One end of a link, such as `localhost:5000 10.0.0.1`.
fn end(input: &str) -> Res<&str, (PhysicalAddress, Ipv4Address)> {
    separated_pair(physical, space1, virtual_address)(input)
}

fn physical(input: &str) -> Res<&str, PhysicalAddress> {
    map(separated_pair(host, char(':'), port), |(host, port)| {
        PhysicalAddress::new(host, port)
    })(input)
}

fn host(input: &str) -> Res<&str, &str> {
    context(
        "host",
        take_till1(|c: char| c == ':' || c.is_whitespace()),
    )(input)
}

fn port(input: &str) -> Res<&str, u16> {
    context("port", map_res(digit1, |s: &str| s.parse::<u16>()))(input)
}

fn virtual_address(input: &str) -> Res<&str, Ipv4Address> {
    context(
        "virtual address",
        map_res(take_till1(char::is_whitespace), |s: &str| {
            s.parse::<Ipv4Address>()
        }),
    )(input)
}
