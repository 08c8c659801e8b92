use trellis_core::config::{Config, MonitorConfig, WorkspaceConfig};
use trellis_core::{HookEvent, HookEventKind, LayoutKind};

use super::*;


pub(super) const FULL_HD: Rect = Rect {
    x: 0,
    y: 0,
    width: 1920,
    height: 1080,
};

pub(super) fn gapless() -> LayoutKind {
    LayoutKind::Bsp { gap: 0, ratio: 0.5 }
}

/// One monitor at `area` with workspaces 1..=3.
pub(super) fn coordinator_with(layout: LayoutKind, area: Rect) -> Coordinator {
    let config = Config {
        layout,
        monitors: vec![MonitorConfig {
            id: MonitorId(0),
            rect: area,
            workspaces: (1..=3)
                .map(|id| WorkspaceConfig {
                    id: WorkspaceId(id),
                    layout: None,
                })
                .collect(),
        }],
        ..Config::default()
    };
    Coordinator::new(config.topology().unwrap(), config.rules.clone())
}

pub(super) fn coordinator() -> Coordinator {
    coordinator_with(gapless(), FULL_HD)
}

/// Plays the role of one observer session, numbering events itself.
pub(super) struct Feed<'a> {
    pub(super) coordinator: &'a Coordinator,
    pub(super) session: SessionId,
    pub(super) pid: u32,
    pub(super) seq: u64,
}

impl<'a> Feed<'a> {
    pub(super) fn open(coordinator: &'a Coordinator, session: u32, pid: u32) -> Self {
        coordinator.open_session(SessionId(session), ProcessId(pid), "editor");
        Self {
            coordinator,
            session: SessionId(session),
            pid,
            seq: 0,
        }
    }

    pub(super) fn window(&self, handle: u64) -> WindowId {
        WindowId::new(self.pid, handle)
    }

    pub(super) fn at(&mut self, seq: u64, handle: u64, kind: HookEventKind) -> Result<Applied> {
        self.seq = seq;
        let event = HookEvent::new(self.window(handle), seq, kind);
        self.coordinator.apply_event(self.session, &event)
    }

    pub(super) fn send(&mut self, handle: u64, kind: HookEventKind) -> Result<Applied> {
        let seq = self.seq + 1;
        self.at(seq, handle, kind)
    }

    pub(super) fn create(&mut self, handle: u64, title: &str) -> Vec<Command> {
        self.send(
            handle,
            HookEventKind::Created {
                rect: Rect::new(100, 100, 400, 300),
                title: title.into(),
            },
        )
        .unwrap()
        .commands
    }
}

pub(super) fn rects(snapshot: &[WindowDescriptor]) -> Vec<Rect> {
    snapshot.iter().map(|d| d.rect).collect()
}

#[test]
fn new_window_joins_active_workspace_of_its_monitor() {
    // Arrange
    let config = Config {
        monitors: vec![
            MonitorConfig {
                id: MonitorId(0),
                rect: FULL_HD,
                workspaces: vec![WorkspaceConfig {
                    id: WorkspaceId(1),
                    layout: None,
                }],
            },
            MonitorConfig {
                id: MonitorId(1),
                rect: Rect::new(1920, 0, 1280, 1024),
                workspaces: vec![WorkspaceConfig {
                    id: WorkspaceId(7),
                    layout: None,
                }],
            },
        ],
        ..Config::default()
    };
    let coordinator = Coordinator::new(config.topology().unwrap(), Vec::new());
    let mut feed = Feed::open(&coordinator, 1, 50);

    // Act
    feed.send(
        1,
        HookEventKind::Created {
            rect: Rect::new(2000, 100, 400, 300),
            title: "right".into(),
        },
    )
    .unwrap();
    feed.send(
        2,
        HookEventKind::Created {
            rect: Rect::new(-5000, -5000, 10, 10),
            title: "offscreen".into(),
        },
    )
    .unwrap();

    // Assert
    assert_eq!(coordinator.workspace_of(feed.window(1)), Some(WorkspaceId(7)));
    assert_eq!(coordinator.workspace_of(feed.window(2)), Some(WorkspaceId(1)));
}

#[test]
fn window_rules_leave_matching_windows_floating() {
    // Arrange
    let coordinator = coordinator();
    let mut feed = Feed::open(&coordinator, 1, 51);

    // Act
    feed.create(1, "Video - Picture-in-Picture");
    feed.create(2, "notes.txt");

    // Assert
    let snapshot = coordinator.snapshot(WorkspaceId(1)).unwrap();
    assert_eq!(snapshot[0].state, WindowState::Floating);
    assert_eq!(snapshot[1].state, WindowState::Tiled);
}

#[test]
fn snapshot_of_unknown_workspace_fails() {
    let coordinator = coordinator();

    let result = coordinator.snapshot(WorkspaceId(99));

    assert!(matches!(result, Err(RelayError::UnknownWorkspace { .. })));
}

#[test]
fn status_reports_sessions_windows_and_losses() {
    // Arrange
    let coordinator = coordinator();
    let mut feed = Feed::open(&coordinator, 1, 52);
    feed.create(1, "a");
    feed.at(5, 1, HookEventKind::FocusChanged).unwrap();

    // Act
    let status = coordinator.status();

    // Assert
    assert_eq!(status.sessions, 1);
    assert_eq!(status.windows, 1);
    assert_eq!(status.lost_events, 3);
    assert_eq!(status.workspaces.len(), 3);
    assert_eq!(status.workspaces[0].windows, 1);
    assert_eq!(status.workspaces[0].layout, "bsp");
    assert!(status.workspaces.iter().all(|w| w.halted.is_none()));
}

#[test]
fn focus_event_marks_descriptor_focused() {
    // Arrange
    let coordinator = coordinator();
    let mut feed = Feed::open(&coordinator, 1, 53);
    feed.create(1, "a");
    feed.create(2, "b");

    // Act
    feed.send(2, HookEventKind::FocusChanged).unwrap();

    // Assert
    let snapshot = coordinator.snapshot(WorkspaceId(1)).unwrap();
    assert!(!snapshot[0].focused);
    assert!(snapshot[1].focused);
    assert_eq!(coordinator.focused(), Some(feed.window(2)));
}
