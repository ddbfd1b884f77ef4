//! Line-oriented front end: one request per line against an in-process host.

use tracing::error;

use crate::config::Config;
use crate::host::memory::MemoryHost;
use crate::interpreter::process_request;

pub const TOO_LARGE: &str = "request too large";
pub const INTERNAL_ERROR: &str = "internal error";

pub struct Frontend {
    host: MemoryHost,
    config: Config,
}

impl Frontend {
    pub fn new(config: Config) -> Self {
        Self::with_host(MemoryHost::new(), config)
    }

    pub fn with_host(host: MemoryHost, config: Config) -> Self {
        Frontend { host, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn host(&self) -> &MemoryHost {
        &self.host
    }

    /// A raw input line. `None` means the client is done (empty line).
    pub fn handle_line(&mut self, line: &str) -> Option<Vec<String>> {
        let request = line.trim();
        if request.len() > self.config.max_request_size {
            return Some(vec![TOO_LARGE.to_string()]);
        }
        if request.is_empty() {
            return None;
        }
        Some(self.run(request))
    }

    /// Host output produced by the request, then the response line.
    pub fn run(&mut self, request: &str) -> Vec<String> {
        if request.len() > self.config.max_request_size {
            return vec![TOO_LARGE.to_string()];
        }
        let result = process_request(&mut self.host, request, &self.config);
        let mut lines = self.host.take_output();
        match result {
            Ok(response) => lines.push(response.to_string()),
            Err(fatal) => {
                error!(error = %fatal, "request aborted");
                lines.push(INTERNAL_ERROR.to_string());
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontend() -> Frontend {
        Frontend::with_host(MemoryHost::with_seed(1), Config::default())
    }

    #[test]
    fn empty_line_ends_session() {
        let mut fe = frontend();
        assert_eq!(fe.handle_line("\n"), None);
        assert_eq!(fe.handle_line("   \r\n"), None);
    }

    #[test]
    fn line_is_trimmed() {
        let mut fe = frontend();
        assert_eq!(fe.handle_line("  int:i2 int:i3 addi \n"), Some(vec!["out: i5".to_string()]));
    }

    #[test]
    fn size_limit() {
        let mut fe = Frontend::with_host(MemoryHost::with_seed(1), Config { max_request_size: 8, ..Config::default() });
        assert_eq!(fe.handle_line("int:i1234"), Some(vec![TOO_LARGE.to_string()]));
        assert_eq!(fe.handle_line("int:i123"), Some(vec!["out: i123".to_string()]));
    }

    #[test]
    fn output_precedes_response() {
        let mut fe = frontend();
        let lines = fe.run("print:hi int:i1 inspect:i1:i0");
        assert_eq!(lines, vec!["log: hi", "inspect: i1", "out:"]);
    }

    #[test]
    fn storage_persists_across_lines() {
        let mut fe = frontend();
        fe.run("user:i1:i2:i3:i4 setn:i0:i42");
        assert_eq!(fe.run("user:i1:i2:i3:i4 getn:i0"), vec!["out: i42 i1"]);
        assert_eq!(fe.run("user:i1:i2:i3:i5 getn:i0"), vec!["out: i0 i0"]);
    }

    #[test]
    #[cfg(debug_assertions)]
    fn fatal_is_internal_error() {
        let mut fe = frontend();
        assert_eq!(fe.run("dbg_fail"), vec![INTERNAL_ERROR]);
        assert_eq!(fe.host().failures(), ["dbg_fail"]);
    }
}
