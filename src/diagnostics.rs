use crate::core::driver::InteractionDriver;
use std::path::PathBuf;
use tracing::debug;

/// Labelled screenshot capture at phase checkpoints.
///
/// Fire-and-forget: every failure inside the sink is swallowed to a debug
/// log. Diagnostics must never gate automaton control flow.
pub struct DiagnosticsSink {
    dir: Option<PathBuf>,
    session: String,
}

impl DiagnosticsSink {
    pub fn disabled() -> Self {
        Self {
            dir: None,
            session: String::new(),
        }
    }

    pub fn to_dir(dir: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            dir: Some(dir.into()),
            session: session.into(),
        }
    }

    pub async fn capture<D: InteractionDriver>(&self, driver: &D, tab: &D::Tab, label: &str) {
        let Some(dir) = &self.dir else {
            return;
        };

        let png = match driver.screenshot(tab).await {
            Ok(png) => png,
            Err(e) => {
                debug!(label, error = %e, "diagnostic capture failed");
                return;
            }
        };

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let file = dir.join(format!("{}-{}-{}.png", self.session, stamp, sanitize(label)));
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            debug!(label, error = %e, "diagnostic dir creation failed");
            return;
        }
        match tokio::fs::write(&file, png).await {
            Ok(()) => debug!(label, path = %file.display(), "diagnostic saved"),
            Err(e) => debug!(label, error = %e, "diagnostic write failed"),
        }
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::driver::InteractionDriver;
    use crate::testing::ScriptedDriver;

    #[test]
    fn labels_become_filesystem_safe() {
        assert_eq!(sanitize("Search: results?"), "Search--results-");
    }

    #[tokio::test]
    async fn disabled_sink_is_a_no_op() {
        let driver = ScriptedDriver::builder().build();
        let tab = driver.open_tab().await.unwrap();
        DiagnosticsSink::disabled()
            .capture(&driver, &tab, "anything")
            .await;
    }
}
