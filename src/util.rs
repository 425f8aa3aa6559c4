// EMTOR: Generation and Validation of ModelNet Topologies for Emulated Tor Networks
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Utility module collection of functions

use lazy_static::lazy_static;
use regex::Regex;

pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

lazy_static! {
    /// Attribute assignments inside a document element. The topology writer
    /// quotes projected node attributes with single quotes and everything
    /// else with double quotes, so both forms must parse.
    static ref ATTR_RE: Regex =
        Regex::new(r#"(\w+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap();
}

/// Extract all `key="value"` (or `key='value'`) assignments from an element
/// body, preserving their order of appearance.
pub fn parse_attrs(element: &str) -> Vec<(String, String)> {
    ATTR_RE
        .captures_iter(element)
        .map(|caps| {
            let key = caps.get(1).unwrap().as_str().to_string();
            let val = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default()
                .to_string();
            (key, val)
        })
        .collect()
}

/// Find a single attribute value in an element body.
pub fn get_attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
