//! Socket configuration file the engine reads to find the controller's port.
//!
//! The file uses the BCVTB client layout:
//!
//! ```xml
//! <?xml version="1.0" encoding="ISO-8859-1"?>
//! <BCVTB-client>
//!   <ipc>
//!     <socket port="40123" hostname="127.0.0.1"/>
//!   </ipc>
//! </BCVTB-client>
//! ```

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// File name the engine looks for in its working directory.
pub const SOCKET_CONFIG_FILE: &str = "socket.cfg";

/// Address advertised to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    pub hostname: String,
    pub port: u16,
}

impl SocketConfig {
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            hostname: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    /// Path of the configuration file inside `dir`.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(SOCKET_CONFIG_FILE)
    }

    /// Writes the configuration into `dir`, replacing any previous file.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the file cannot be created or written.
    pub fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = Self::path_in(dir);
        let mut out = BufWriter::new(File::create(&path)?);
        self.write(&mut out)?;
        out.flush()?;
        Ok(path)
    }

    /// Writes the XML document to any writer.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if writing fails.
    pub fn write(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, r#"<?xml version="1.0" encoding="ISO-8859-1"?>"#)?;
        writeln!(out, "<BCVTB-client>")?;
        writeln!(out, "  <ipc>")?;
        writeln!(
            out,
            r#"    <socket port="{}" hostname="{}"/>"#,
            self.port, self.hostname
        )?;
        writeln!(out, "  </ipc>")?;
        writeln!(out, "</BCVTB-client>")
    }

    /// Reads the configuration back from `dir`.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the file is missing or lacks a valid
    /// `port`/`hostname` pair.
    pub fn read_from(dir: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(Self::path_in(dir))?;
        Self::parse(&text)
    }

    /// Parses the `<socket .../>` element of a configuration document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if the element or one of its attributes is missing.
    pub fn parse(text: &str) -> io::Result<Self> {
        let start = text
            .find("<socket")
            .ok_or_else(|| invalid("missing <socket> element"))?;
        let element = &text[start..];
        let element = &element[..element.find('>').unwrap_or(element.len())];

        let port = attribute(element, "port")
            .ok_or_else(|| invalid("missing port attribute"))?
            .parse::<u16>()
            .map_err(|e| invalid(&format!("invalid port: {e}")))?;
        let hostname = attribute(element, "hostname")
            .ok_or_else(|| invalid("missing hostname attribute"))?
            .to_string();

        Ok(Self { hostname, port })
    }
}

fn attribute<'a>(element: &'a str, name: &str) -> Option<&'a str> {
    let marker = format!(" {name}=\"");
    let start = element.find(&marker)? + marker.len();
    let rest = &element[start..];
    rest.find('"').map(|end| &rest[..end])
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}
