//! Channel encoders: each applies a scenario through the web UI, `uci` over
//! SSH, or the REST API.

pub mod broker;
pub mod data_sender;
pub mod options;
pub mod uci;

use chrono::{DateTime, Local};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ssh,
    Api,
    Gui,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Ssh, Channel::Api, Channel::Gui];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Ssh => "ssh",
            Channel::Api => "api",
            Channel::Gui => "gui",
        }
    }

    /// Parses a `--test-type` value; `all` expands to every channel.
    pub fn parse_selection(value: &str) -> Result<Vec<Channel>, String> {
        if value.eq_ignore_ascii_case("all") {
            return Ok(Self::ALL.to_vec());
        }
        value.parse().map(|c| vec![c])
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ssh" => Ok(Channel::Ssh),
            "api" => Ok(Channel::Api),
            "gui" => Ok(Channel::Gui),
            other => Err(format!(
                "Unknown test type '{}', expected ssh, api, gui or all",
                other
            )),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one (scenario, channel) attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub scenario: String,
    pub channel: String,
    pub passed: bool,
    pub details: String,
    pub timestamp: DateTime<Local>,
}

impl TestResult {
    pub fn new(
        scenario: impl Into<String>,
        channel: impl Into<String>,
        passed: bool,
        details: impl Into<String>,
    ) -> Self {
        Self {
            scenario: scenario.into(),
            channel: channel.into(),
            passed,
            details: details.into(),
            timestamp: Local::now(),
        }
    }

    pub fn pass(scenario: impl Into<String>, channel: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(scenario, channel, true, details)
    }

    pub fn fail(scenario: impl Into<String>, channel: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(scenario, channel, false, details)
    }

    pub fn status(&self) -> &'static str {
        if self.passed {
            "PASS"
        } else {
            "FAIL"
        }
    }
}
