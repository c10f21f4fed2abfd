//! Alt-tab style window cycling across all workspaces.
//!
//! A press while idle snapshots the candidates and selects one step away
//! from the focused window; further presses move the selection. Releasing
//! the modifier commits: exactly one focus command, then back to idle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{Instrument, debug, info_span, instrument, warn};

use crate::model::{WindowId, WindowRecord};
use crate::sys::modifiers::ModifierState;
use crate::sys::window_service::{TransportResult, WindowService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CycleDirection {
    Next,
    Previous,
}

/// Windows worth cycling through, ordered by workspace and then id.
pub fn cycle_candidates(windows: Vec<WindowRecord>, excluded: &[String]) -> Vec<WindowRecord> {
    let mut candidates: Vec<WindowRecord> = windows
        .into_iter()
        .filter(|w| !w.title_or_empty().trim().is_empty())
        .filter(|w| !excluded.contains(&w.app_bundle_id))
        .collect();
    candidates.sort_by(|a, b| {
        a.workspace.as_str().cmp(b.workspace.as_str()).then(a.window_id.cmp(&b.window_id))
    });
    candidates
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSession {
    pub initial_window_id: Option<WindowId>,
    pub candidates: Vec<WindowRecord>,
    pub selected_index: usize,
}

impl CycleSession {
    /// `None` with fewer than two candidates; the caller should cycle
    /// immediately instead.
    pub fn start(
        candidates: Vec<WindowRecord>,
        focused: Option<WindowId>,
        direction: CycleDirection,
    ) -> Option<Self> {
        if candidates.len() < 2 {
            return None;
        }
        let position = focused.and_then(|id| candidates.iter().position(|w| w.window_id == id));
        let mut session = Self {
            initial_window_id: focused,
            selected_index: position.unwrap_or(0),
            candidates,
        };
        match (position, direction) {
            (Some(_), _) => session.advance(direction),
            (None, CycleDirection::Next) => {}
            (None, CycleDirection::Previous) => {
                session.selected_index = session.candidates.len() - 1
            }
        }
        Some(session)
    }

    pub fn advance(&mut self, direction: CycleDirection) {
        let len = self.candidates.len();
        self.selected_index = match direction {
            CycleDirection::Next => (self.selected_index + 1) % len,
            CycleDirection::Previous => (self.selected_index + len - 1) % len,
        };
    }

    pub fn selected(&self) -> &WindowRecord { &self.candidates[self.selected_index] }
}

async fn commit<S: WindowService>(service: &S, session: CycleSession) -> Option<WindowId> {
    let target = session.selected().window_id;
    match service.focus_window(target).await {
        Ok(()) => {
            debug!(%target, "cycle committed");
            Some(target)
        }
        Err(err) => {
            warn!(%target, %err, "could not focus cycle selection");
            None
        }
    }
}

/// What a key press did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CyclePress {
    Started(CycleSession),
    Advanced(CycleSession),
    /// Too few candidates for a session; focus moved directly (if anywhere).
    Immediate(Option<WindowId>),
}

/// Owns the one cycle session and its modifier watchdog.
pub struct WindowCycler<S, M> {
    service: Arc<S>,
    modifiers: Arc<M>,
    excluded: Vec<String>,
    watchdog_interval: Duration,
    session: Arc<Mutex<Option<CycleSession>>>,
}

impl<S, M> WindowCycler<S, M>
where
    S: WindowService + 'static,
    M: ModifierState + 'static,
{
    pub fn new(
        service: Arc<S>,
        modifiers: Arc<M>,
        excluded: Vec<String>,
        watchdog_interval: Duration,
    ) -> Self {
        Self {
            service,
            modifiers,
            excluded,
            watchdog_interval,
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_active(&self) -> bool { self.session.lock().is_some() }

    pub fn session(&self) -> Option<CycleSession> { self.session.lock().clone() }

    #[instrument(skip(self))]
    pub async fn press(&self, direction: CycleDirection) -> TransportResult<CyclePress> {
        if let Some(advanced) = self.advance(direction) {
            return Ok(CyclePress::Advanced(advanced));
        }

        let (candidates, focused) = self.snapshot().await?;
        let Some(session) = CycleSession::start(candidates, focused, direction) else {
            return Ok(CyclePress::Immediate(self.cycle_once(direction).await?));
        };

        {
            let mut slot = self.session.lock();
            // Another press may have started a session while we were listing.
            if let Some(active) = slot.as_mut() {
                active.advance(direction);
                return Ok(CyclePress::Advanced(active.clone()));
            }
            *slot = Some(session.clone());
        }
        self.spawn_watchdog();
        Ok(CyclePress::Started(session))
    }

    fn advance(&self, direction: CycleDirection) -> Option<CycleSession> {
        let mut slot = self.session.lock();
        let active = slot.as_mut()?;
        active.advance(direction);
        Some(active.clone())
    }

    /// Focuses the current selection and ends the session.
    pub async fn commit(&self) -> Option<WindowId> {
        let session = self.session.lock().take()?;
        commit(&*self.service, session).await
    }

    /// Ends the session without moving focus.
    pub fn dismiss(&self) {
        if self.session.lock().take().is_some() {
            debug!("cycle dismissed");
        }
    }

    /// One step without a session.
    pub async fn cycle_once(&self, direction: CycleDirection) -> TransportResult<Option<WindowId>> {
        let (candidates, focused) = self.snapshot().await?;
        let target = match CycleSession::start(candidates.clone(), focused, direction) {
            Some(session) => session.selected().window_id,
            None => match candidates.first() {
                Some(only) if Some(only.window_id) != focused => only.window_id,
                _ => return Ok(None),
            },
        };
        self.service.focus_window(target).await?;
        Ok(Some(target))
    }

    async fn snapshot(&self) -> TransportResult<(Vec<WindowRecord>, Option<WindowId>)> {
        let windows = self.service.list_windows_all().await?;
        let focused = self.service.list_windows_focused().await?.first().map(|w| w.window_id);
        Ok((cycle_candidates(windows, &self.excluded), focused))
    }

    fn spawn_watchdog(&self) {
        let service = self.service.clone();
        let modifiers = self.modifiers.clone();
        let session = self.session.clone();
        let interval = self.watchdog_interval;
        tokio::spawn(
            async move {
                loop {
                    sleep(interval).await;
                    if modifiers.is_held() {
                        if session.lock().is_none() {
                            return;
                        }
                        continue;
                    }
                    let taken = session.lock().take();
                    if let Some(taken) = taken {
                        debug!("modifier released");
                        commit(&*service, taken).await;
                    }
                    return;
                }
            }
            .instrument(info_span!("cycle watchdog")),
        );
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::actor::testing::*;
    use crate::sys::window_service::TransportError;

    fn five() -> Vec<WindowRecord> {
        (1..=5).map(|i| window(i, BROWSER, "ap-demo", &format!("tab {i}"))).collect()
    }

    fn focus_calls(service: &FakeWindowService) -> Vec<Call> {
        service.calls().into_iter().filter(|c| matches!(c, Call::Focus(_))).collect()
    }

    #[test]
    fn full_lap_returns_to_start() {
        let mut session =
            CycleSession::start(five(), Some(WindowId::new(1)), CycleDirection::Next).unwrap();
        assert_eq!(session.selected_index, 1);
        for _ in 0..4 {
            session.advance(CycleDirection::Next);
        }
        assert_eq!(session.selected_index, 0);
        assert_eq!(session.initial_window_id, Some(WindowId::new(1)));
    }

    #[test]
    fn previous_wraps() {
        let session =
            CycleSession::start(five(), Some(WindowId::new(1)), CycleDirection::Previous).unwrap();
        assert_eq!(session.selected_index, 4);

        let unfocused = CycleSession::start(five(), None, CycleDirection::Previous).unwrap();
        assert_eq!(unfocused.selected_index, 4);
        let unfocused = CycleSession::start(five(), None, CycleDirection::Next).unwrap();
        assert_eq!(unfocused.selected_index, 0);
    }

    #[test]
    fn too_few_candidates() {
        assert_eq!(CycleSession::start(vec![], None, CycleDirection::Next), None);
        let one = vec![window(1, BROWSER, "1", "x")];
        assert_eq!(CycleSession::start(one, None, CycleDirection::Next), None);
    }

    #[test]
    fn candidates_are_filtered_and_ordered() {
        let windows = vec![
            window(9, BROWSER, "b", "nine"),
            window(3, BROWSER, "b", "three"),
            window(7, EDITOR, "a", "seven"),
            window(1, BROWSER, "a", "  "),
            window(2, TERMINAL, "a", "two"),
        ];
        let ids: Vec<i64> = cycle_candidates(windows, &[TERMINAL.to_string()])
            .iter()
            .map(|w| w.window_id.get())
            .collect();
        assert_eq!(ids, vec![7, 3, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn release_commits_once() {
        let service = FakeWindowService::with_windows(five());
        service.update(|s| s.focused_window = Some(WindowId::new(1)));
        let modifiers = FakeModifiers::held();
        let cycler =
            WindowCycler::new(service.clone(), modifiers.clone(), vec![], Duration::from_millis(30));

        let started = cycler.press(CycleDirection::Next).await.unwrap();
        assert!(matches!(started, CyclePress::Started(ref s) if s.selected_index == 1));
        let advanced = cycler.press(CycleDirection::Next).await.unwrap();
        assert!(matches!(advanced, CyclePress::Advanced(ref s) if s.selected_index == 2));

        sleep(Duration::from_millis(200)).await;
        assert!(cycler.is_active());
        assert!(focus_calls(&service).is_empty());

        modifiers.release();
        sleep(Duration::from_millis(100)).await;

        assert!(!cycler.is_active());
        assert_eq!(focus_calls(&service), vec![Call::Focus(WindowId::new(3))]);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_commit_preempts_watchdog() {
        let service = FakeWindowService::with_windows(five());
        let modifiers = FakeModifiers::held();
        let cycler =
            WindowCycler::new(service.clone(), modifiers.clone(), vec![], Duration::from_millis(30));

        cycler.press(CycleDirection::Previous).await.unwrap();
        assert_eq!(cycler.commit().await, Some(WindowId::new(5)));
        modifiers.release();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(focus_calls(&service).len(), 1);
        assert_eq!(cycler.commit().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_ends_session_without_focusing() {
        let service = FakeWindowService::with_windows(five());
        service.update(|s| s.focused_window = Some(WindowId::new(1)));
        let modifiers = FakeModifiers::held();
        let cycler =
            WindowCycler::new(service.clone(), modifiers.clone(), vec![], Duration::from_millis(30));

        cycler.press(CycleDirection::Next).await.unwrap();
        cycler.press(CycleDirection::Next).await.unwrap();
        cycler.dismiss();
        assert!(!cycler.is_active());

        modifiers.release();
        sleep(Duration::from_millis(100)).await;
        assert!(focus_calls(&service).is_empty());
        assert_eq!(cycler.commit().await, None);

        let again = cycler.press(CycleDirection::Next).await.unwrap();
        assert!(matches!(again, CyclePress::Started(ref s) if s.selected_index == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn focus_failure_still_ends_session() {
        let service = FakeWindowService::with_windows(five());
        service.update(|s| {
            s.focus_error = Some(TransportError::NotReady { reason: "gone".into() })
        });
        let cycler = WindowCycler::new(
            service.clone(),
            FakeModifiers::held(),
            vec![],
            Duration::from_millis(30),
        );

        cycler.press(CycleDirection::Next).await.unwrap();
        assert_eq!(cycler.commit().await, None);
        assert!(!cycler.is_active());
        assert_eq!(focus_calls(&service).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_window_cycles_immediately() {
        let service = FakeWindowService::with_windows(vec![
            window(4, BROWSER, "1", "only"),
            window(5, BROWSER, "1", ""),
        ]);
        let cycler = WindowCycler::new(
            service.clone(),
            FakeModifiers::held(),
            vec![],
            Duration::from_millis(30),
        );

        let press = cycler.press(CycleDirection::Next).await.unwrap();

        assert_eq!(press, CyclePress::Immediate(Some(WindowId::new(4))));
        assert!(!cycler.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_once_moves_one_step() {
        let service = FakeWindowService::with_windows(vec![
            window(1, BROWSER, "ap-demo", "a"),
            window(2, EDITOR, "ap-other", "b"),
        ]);
        service.update(|s| s.focused_window = Some(WindowId::new(2)));
        let cycler = WindowCycler::new(
            service.clone(),
            FakeModifiers::held(),
            vec![],
            Duration::from_millis(30),
        );

        assert_eq!(cycler.cycle_once(CycleDirection::Next).await, Ok(Some(WindowId::new(1))));
        assert_eq!(focus_calls(&service), vec![Call::Focus(WindowId::new(1))]);
        assert!(!cycler.is_active());
    }
}
