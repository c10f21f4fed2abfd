//! [`WindowPositioner`] driven through JavaScript for Automation
//! (`osascript -l JavaScript`) and System Events.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, trace};

use super::command;
use super::geometry::Rect;
use super::positioner::{
    AxCandidate, PositionerError, WindowHandle, WindowPositioner, pick_candidate,
};
use super::window_service::TransportError;

const LIST_WINDOWS: &str = r#"
function run(argv) {
  const se = Application('System Events');
  const out = [];
  se.applicationProcesses.whose({ bundleIdentifier: argv[0] })().forEach(p => {
    const pid = p.unixId();
    p.windows().forEach((w, i) => out.push({ pid: pid, index: i, title: w.name() || '' }));
  });
  return JSON.stringify(out);
}
"#;

const SET_FRAME: &str = r#"
function run(argv) {
  const se = Application('System Events');
  const procs = se.applicationProcesses.whose({ unixId: Number(argv[0]) })();
  if (procs.length === 0) return 'gone';
  const windows = procs[0].windows();
  const w = windows[Number(argv[1])];
  if (w === undefined) return 'gone';
  w.position = [Number(argv[2]), Number(argv[3])];
  w.size = [Number(argv[4]), Number(argv[5])];
  return 'ok';
}
"#;

const READ_TITLE: &str = r#"
function run(argv) {
  const se = Application('System Events');
  const procs = se.applicationProcesses.whose({ unixId: Number(argv[0]) })();
  if (procs.length === 0) return '';
  const w = procs[0].windows()[Number(argv[1])];
  return w === undefined ? '' : (w.name() || '');
}
"#;

const VISIBLE_FRAME: &str = r#"
ObjC.import('AppKit');
function run() {
  const screen = $.NSScreen.mainScreen;
  const f = screen.frame;
  const v = screen.visibleFrame;
  return JSON.stringify({
    x: v.origin.x,
    y: f.size.height - (v.origin.y + v.size.height),
    width: v.size.width,
    height: v.size.height,
  });
}
"#;

pub struct OsaScriptPositioner {
    timeout: Duration,
}

#[derive(Deserialize)]
struct RawCandidate {
    pid: i32,
    index: usize,
    title: String,
}

impl OsaScriptPositioner {
    pub fn new(timeout: Duration) -> Self { Self { timeout } }

    async fn script(&self, source: &str, argv: Vec<String>) -> Result<String, PositionerError> {
        let mut args = vec!["-l".to_string(), "JavaScript".to_string(), "-e".to_string()];
        args.push(source.to_string());
        args.extend(argv);
        match command::run("osascript", &args, self.timeout).await {
            Ok(output) => Ok(output.stdout.trim().to_string()),
            Err(TransportError::NonZeroExit { stderr, .. }) if assistive_access_denied(&stderr) => {
                Err(PositionerError::PermissionDenied)
            }
            Err(err) => Err(PositionerError::Failed(err.to_string())),
        }
    }
}

fn assistive_access_denied(stderr: &str) -> bool {
    stderr.contains("assistive access") || stderr.contains("-1719") || stderr.contains("-25211")
}

fn decode_candidates(stdout: &str) -> Result<Vec<AxCandidate>, PositionerError> {
    let raw: Vec<RawCandidate> = serde_json::from_str(stdout)
        .map_err(|err| PositionerError::Failed(format!("bad window listing: {err}")))?;
    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(enumeration_index, c)| AxCandidate {
            handle: WindowHandle { pid: c.pid, index: c.index },
            title: c.title,
            enumeration_index,
        })
        .collect())
}

impl WindowPositioner for OsaScriptPositioner {
    async fn find_window(
        &self,
        bundle_id: &str,
        title_or_token: &str,
    ) -> Result<Option<WindowHandle>, PositionerError> {
        let stdout = self.script(LIST_WINDOWS, vec![bundle_id.to_string()]).await?;
        let candidates = decode_candidates(&stdout)?;
        trace!(bundle_id, count = candidates.len(), "accessibility windows");
        Ok(pick_candidate(&candidates, title_or_token))
    }

    async fn set_frame(&self, handle: WindowHandle, frame: Rect) -> Result<(), PositionerError> {
        let argv = vec![
            handle.pid.to_string(),
            handle.index.to_string(),
            frame.x.round().to_string(),
            frame.y.round().to_string(),
            frame.width.round().to_string(),
            frame.height.round().to_string(),
        ];
        match self.script(SET_FRAME, argv).await?.as_str() {
            "ok" => Ok(()),
            "gone" => Err(PositionerError::WindowGone),
            other => Err(PositionerError::Failed(format!("unexpected reply: {other}"))),
        }
    }

    async fn read_title(&self, handle: WindowHandle) -> Option<String> {
        let argv = vec![handle.pid.to_string(), handle.index.to_string()];
        match self.script(READ_TITLE, argv).await {
            Ok(title) if !title.is_empty() => Some(title),
            Ok(_) => None,
            Err(err) => {
                debug!(?handle, %err, "could not read window title");
                None
            }
        }
    }

    async fn visible_frame(&self) -> Option<Rect> {
        let stdout = self.script(VISIBLE_FRAME, Vec::new()).await.ok()?;
        let frame: Rect = serde_json::from_str(&stdout).ok()?;
        (!frame.is_empty()).then_some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_keep_listing_order_as_enumeration_index() {
        let stdout = r#"[{"pid": 5, "index": 0, "title": "b"}, {"pid": 5, "index": 1, "title": "a"}]"#;
        let candidates = decode_candidates(stdout).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].enumeration_index, 1);
        assert_eq!(candidates[1].title, "a");
    }

    #[test]
    fn permission_errors_are_recognized() {
        assert!(assistive_access_denied(
            "execution error: osascript is not allowed assistive access. (-1719)"
        ));
        assert!(!assistive_access_denied("execution error: Can't get window 3."));
    }
}
