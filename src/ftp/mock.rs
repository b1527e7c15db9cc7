//! Scripted in-memory FTP server for engine tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Read};
use std::sync::Arc;

use parking_lot::Mutex;

use super::connection::ConnectionConfig;
use super::error::FtpError;
use super::transport::{Connector, FtpTransport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEntry {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Debug, Default)]
pub struct MockState {
    /// Directory path (no trailing slash) to its entries, in listing order.
    pub dirs: BTreeMap<String, Vec<MockEntry>>,
    pub uploads: HashMap<String, Vec<u8>>,
    pub cwd: String,
    pub calls: Vec<String>,

    /// NLST answers 500 for every path.
    pub nlst_unsupported: bool,
    /// NLST answers with absolute paths instead of bare names.
    pub nlst_full_paths: bool,
    /// Remaining `150` hiccups per NLST path.
    pub nlst_hiccups: HashMap<String, u32>,
    /// NLST on these paths resets the connection every time.
    pub nlst_resets: HashSet<String>,
    /// CWD and NLST answer 550 for these paths.
    pub denied: HashSet<String>,
    /// STOR answers 552 for these remote paths.
    pub store_failures: HashSet<String>,
    pub fail_noop: bool,
    /// NOOP starts failing after this many successful calls.
    pub noop_budget: Option<usize>,
    pub fail_quit: bool,
    /// CWD with exactly this argument drops the connection.
    pub cwd_failures: HashSet<String>,
    /// LIST in these directories fails with the given reply code.
    pub list_failures: HashMap<String, u32>,
}

impl MockState {
    fn resolve(&self, path: &str) -> String {
        let joined = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.cwd.trim_end_matches('/'), path)
        };
        normalize(&joined)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains_key(path)
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parent_and_name(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(0) => ("/".to_string(), path[1..].to_string()),
        Some(i) => (path[..i].to_string(), path[i + 1..].to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}

fn denied(path: &str) -> TransportError {
    TransportError::permanent(550, format!("{}: No such file or directory", path))
}

/// Handle shared between a test and every transport it hands out.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
}

impl MockServer {
    pub fn new() -> Self {
        let server = Self::default();
        server.with(|s| {
            s.cwd = "/".to_string();
            s.dirs.insert("/".to_string(), Vec::new());
        });
        server
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Register a directory and all of its ancestors.
    pub fn add_dir(&self, path: &str) -> &Self {
        let path = normalize(path);
        self.with(|s| {
            let mut current = path.clone();
            while current != "/" {
                s.dirs.entry(current.clone()).or_default();
                let (parent, name) = parent_and_name(&current);
                let siblings = s.dirs.entry(parent.clone()).or_default();
                if !siblings.iter().any(|e| e.name == name) {
                    siblings.push(MockEntry { name, is_dir: true });
                }
                current = parent;
            }
        });
        self
    }

    pub fn add_file(&self, path: &str) -> &Self {
        let (parent, name) = parent_and_name(&normalize(path));
        self.add_dir(&parent);
        self.with(|s| {
            let entries = s.dirs.entry(parent).or_default();
            if !entries.iter().any(|e| e.name == name) {
                entries.push(MockEntry {
                    name,
                    is_dir: false,
                });
            }
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.starts_with(prefix)).count())
    }

    pub fn uploaded(&self, path: &str) -> Option<Vec<u8>> {
        self.with(|s| s.uploads.get(path).cloned())
    }

    pub fn cwd(&self) -> String {
        self.with(|s| s.cwd.clone())
    }

    pub fn transport(&self) -> MockTransport {
        MockTransport {
            server: self.clone(),
        }
    }
}

pub struct MockTransport {
    server: MockServer,
}

impl FtpTransport for MockTransport {
    fn cwd(&mut self, path: &str) -> Result<(), TransportError> {
        self.server.with(|s| {
            s.calls.push(format!("CWD {}", path));
            if s.cwd_failures.contains(path) {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )));
            }
            let target = s.resolve(path);
            if s.denied.contains(&target) || !s.is_dir(&target) {
                return Err(denied(path));
            }
            s.cwd = target;
            Ok(())
        })
    }

    fn pwd(&mut self) -> Result<String, TransportError> {
        self.server.with(|s| {
            s.calls.push("PWD".to_string());
            Ok(s.cwd.clone())
        })
    }

    fn nlst(&mut self, path: &str) -> Result<Vec<String>, TransportError> {
        self.server.with(|s| {
            s.calls.push(format!("NLST {}", path));
            if s.nlst_unsupported {
                return Err(TransportError::permanent(500, "NLST not understood"));
            }
            let target = s.resolve(path);
            if s.nlst_resets.contains(&target) {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )));
            }
            if let Some(remaining) = s.nlst_hiccups.get_mut(&target) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::transient(150, "Opening data connection"));
                }
            }
            if s.denied.contains(&target) {
                return Err(denied(path));
            }
            let full_paths = s.nlst_full_paths;
            match s.dirs.get(&target) {
                Some(entries) => Ok(entries
                    .iter()
                    .map(|e| {
                        if full_paths {
                            format!("{}/{}", target.trim_end_matches('/'), e.name)
                        } else {
                            e.name.clone()
                        }
                    })
                    .collect()),
                None => Err(denied(path)),
            }
        })
    }

    fn list(&mut self, on_line: &mut dyn FnMut(&str)) -> Result<(), TransportError> {
        let lines = self.server.with(|s| {
            s.calls.push("LIST".to_string());
            if let Some(&code) = s.list_failures.get(&s.cwd) {
                return Err(if code >= 500 {
                    TransportError::permanent(code, "Requested action not taken")
                } else {
                    TransportError::transient(code, "Connection closed; transfer aborted")
                });
            }
            let mut lines = vec![
                "drwxr-xr-x 2 root wheel 512 Jan 1 00:00 .".to_string(),
                "drwxr-xr-x 2 root wheel 512 Jan 1 00:00 ..".to_string(),
            ];
            if let Some(entries) = s.dirs.get(&s.cwd) {
                lines.extend(entries.iter().map(|e| {
                    let mode = if e.is_dir { "drwxrwxrwx" } else { "-rw-rw-rw-" };
                    format!("{} 1 nobody nobody 4096 Mar 14 12:30 {}", mode, e.name)
                }));
            }
            Ok(lines)
        })?;
        for line in &lines {
            on_line(line);
        }
        Ok(())
    }

    fn noop(&mut self) -> Result<(), TransportError> {
        self.server.with(|s| {
            s.calls.push("NOOP".to_string());
            if let Some(budget) = s.noop_budget.as_mut() {
                if *budget == 0 {
                    s.fail_noop = true;
                } else {
                    *budget -= 1;
                }
            }
            if s.fail_noop {
                Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "[WinError 10054] An existing connection was forcibly closed by the remote host",
                )))
            } else {
                Ok(())
            }
        })
    }

    fn store(&mut self, remote_path: &str, reader: &mut dyn Read) -> Result<u64, TransportError> {
        let target = self.server.with(|s| {
            s.calls.push(format!("STOR {}", remote_path));
            s.resolve(remote_path)
        });
        if self.server.with(|s| s.store_failures.contains(&target)) {
            return Err(TransportError::permanent(552, "Requested file action aborted"));
        }
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let written = data.len() as u64;
        self.server.with(|s| s.uploads.insert(target.clone(), data));
        self.server.add_file(&target);
        Ok(written)
    }

    fn quit(&mut self) -> Result<(), TransportError> {
        self.server.with(|s| {
            s.calls.push("QUIT".to_string());
            if s.fail_quit {
                Err(TransportError::transient(421, "Service not available"))
            } else {
                Ok(())
            }
        })
    }

    fn close(&mut self) {
        self.server.with(|s| s.calls.push("CLOSE".to_string()));
    }
}

/// Hands out [`MockTransport`]s bound to one [`MockServer`].
pub struct MockConnector {
    server: MockServer,
    reject_login: bool,
    time_out: bool,
}

impl MockConnector {
    pub fn new(server: &MockServer) -> Self {
        Self {
            server: server.clone(),
            reject_login: false,
            time_out: false,
        }
    }

    pub fn rejecting_login(mut self) -> Self {
        self.reject_login = true;
        self
    }

    pub fn timing_out(mut self) -> Self {
        self.time_out = true;
        self
    }
}

impl Connector for MockConnector {
    fn open(
        &self,
        config: &ConnectionConfig,
        _password: &str,
    ) -> Result<Box<dyn FtpTransport>, FtpError> {
        if self.time_out {
            return Err(FtpError::Timeout {
                operation: "Connection".to_string(),
                seconds: config.timeout_seconds(),
            });
        }
        if self.reject_login {
            return Err(FtpError::Authentication {
                username: config.username().to_string(),
                source: TransportError::permanent(530, "Login incorrect"),
            });
        }
        Ok(Box::new(self.server.transport()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_dir_registers_every_ancestor() {
        let server = MockServer::new();
        server.add_dir("/mnt/usb0/homebrew/GameA");
        server.add_dir("/mnt/usb0/homebrew/GameB");

        server.with(|s| {
            for dir in ["/mnt", "/mnt/usb0", "/mnt/usb0/homebrew"] {
                assert!(s.is_dir(dir), "{} missing", dir);
            }
            let names: Vec<_> = s.dirs["/mnt/usb0/homebrew"].iter().map(|e| e.name.as_str()).collect();
            assert_eq!(names, ["GameA", "GameB"]);
            assert_eq!(s.dirs["/mnt"].len(), 1);
            assert_eq!(s.dirs["/"].len(), 1);
        });
    }
}
