use crate::error_handling::types::ConfigError;
use std::collections::BTreeSet;

/// Expands a port specification such as `"22,80-82"` into the set of concrete ports.
///
/// Tokens are separated by commas and may be a single port or an inclusive `start-end` range.
/// Whitespace around tokens is ignored. An empty token, including an empty specification, is
/// an error like any other invalid token and fails the whole specification.
pub fn resolve_ports(spec: &str) -> Result<BTreeSet<u16>, ConfigError> {
    let mut ports = BTreeSet::new();

    for token in spec.split(',').map(str::trim) {
        if token.is_empty() {
            return Err(ConfigError::BadPortsRange(format!("'{}': empty port token", spec)));
        }

        let bounds: Vec<&str> = token.split('-').map(str::trim).collect();
        match bounds.as_slice() {
            [single] => {
                ports.insert(parse_port(single, spec)?);
            }
            [start, end] => {
                let start = parse_port(start, spec)?;
                let end = parse_port(end, spec)?;
                if start > end {
                    return Err(ConfigError::BadPortsRange(format!(
                        "{}: range {}-{} is reversed",
                        spec, start, end
                    )));
                }
                ports.extend(start..=end);
            }
            _ => {
                return Err(ConfigError::BadPortsRange(format!(
                    "{}: invalid token '{}'",
                    spec, token
                )))
            }
        }
    }

    Ok(ports)
}

fn parse_port(value: &str, spec: &str) -> Result<u16, ConfigError> {
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::BadPortsRange(format!("{}: '{}' is not a port", spec, value)))
}
