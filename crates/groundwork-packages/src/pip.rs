use crate::client::PackageClient;
use crate::PackageError;
use groundwork_schema::Pin;
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Drives `python -m pip` as a subprocess.
#[derive(Debug, Clone)]
pub struct PipClient {
    python: String,
}

impl PipClient {
    pub fn new(python: &str) -> Self {
        Self {
            python: python.to_owned(),
        }
    }

    fn run(&self, argv: &[String]) -> Result<Output, PackageError> {
        debug!("running {}", argv.join(" "));
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .output()
            .map_err(|source| PackageError::Spawn {
                tool: argv[0].clone(),
                source,
            })?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(PackageError::ToolFailed {
                tool: format!("{} -m pip", self.python),
                status: output.status.to_string(),
                output: tool_output(&output),
            })
        }
    }
}

impl PackageClient for PipClient {
    fn name(&self) -> &'static str {
        "pip"
    }

    fn installed(&self) -> Result<Vec<Pin>, PackageError> {
        let output = self.run(&list_command(&self.python))?;
        Ok(parse_freeze(&String::from_utf8_lossy(&output.stdout)))
    }

    fn install(&self, index_url: Option<&str>, pins: &[Pin]) -> Result<(), PackageError> {
        self.run(&install_command(&self.python, index_url, pins))?;
        Ok(())
    }
}

/// Build the install invocation. Pins are passed as `name==version`, one argument each.
pub fn install_command(python: &str, index_url: Option<&str>, pins: &[Pin]) -> Vec<String> {
    let mut cmd = vec![
        python.to_owned(),
        "-m".to_owned(),
        "pip".to_owned(),
        "install".to_owned(),
        "--no-input".to_owned(),
        "--disable-pip-version-check".to_owned(),
    ];
    if let Some(url) = index_url {
        cmd.push("--index-url".to_owned());
        cmd.push(url.to_owned());
    }
    cmd.extend(pins.iter().map(Pin::requirement));
    cmd
}

pub fn list_command(python: &str) -> Vec<String> {
    vec![
        python.to_owned(),
        "-m".to_owned(),
        "pip".to_owned(),
        "list".to_owned(),
        "--format=freeze".to_owned(),
        "--disable-pip-version-check".to_owned(),
    ]
}

/// Parse `name==version` lines. Editable installs, direct references and
/// comments carry no exact version and are ignored.
pub fn parse_freeze(output: &str) -> Vec<Pin> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .filter_map(|line| line.split_once("=="))
        .map(|(name, version)| Pin::new(name.trim(), version.trim()))
        .collect()
}

/// stderr then stdout, byte-for-byte apart from lossy UTF-8 decoding.
pub(crate) fn tool_output(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    match (stderr.is_empty(), stdout.is_empty()) {
        (false, false) => format!("{stderr}{stdout}"),
        (false, true) => stderr.into_owned(),
        (true, _) => stdout.into_owned(),
    }
}
