use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::alarm::Alarm;
use crate::error::Result;
use crate::event::DaemonEvent;
use crate::player::Playback;
use crate::settings::SchedulerSettings;
use crate::store::{ConfigStore, Intent};

/// Edge-triggered alarm evaluation.
///
/// The scheduler remembers whether the previous tick found an open alarm
/// window and only commands the player when that answer changes. While a
/// window stays open and the persisted intent is still "on", a player that
/// died on its own is relaunched.
///
/// Every player command is issued through [`ConfigStore::with_intent`], so it
/// is ordered with manual switches made through the API.
pub struct Scheduler {
    window_minutes: u32,
    reassert_playback: bool,
    should_play: bool,
    /// Malformed entries already warned about, by list index.
    malformed: HashMap<usize, Value>,
}

impl Scheduler {
    pub fn new(settings: &SchedulerSettings) -> Self {
        Self {
            window_minutes: settings.effective_window_minutes(),
            reassert_playback: settings.reassert_playback,
            should_play: false,
            malformed: HashMap::new(),
        }
    }

    /// True while the last tick found an open alarm window.
    pub fn should_play(&self) -> bool {
        self.should_play
    }

    /// Name of the first enabled alarm, in list order, whose window contains
    /// `now`. Malformed entries are skipped; each one is warned about once
    /// until it changes.
    pub fn matching_alarm(&mut self, alarms: &[Value], now: NaiveDateTime) -> Option<String> {
        self.malformed
            .retain(|index, entry| alarms.get(*index) == Some(&*entry));

        for (index, entry) in alarms.iter().enumerate() {
            match Alarm::from_value(entry) {
                Ok(alarm) if alarm.on && alarm.is_active_at(now, self.window_minutes) => {
                    return Some(alarm.name);
                }
                Ok(_) => {}
                Err(e) => {
                    if self.malformed.insert(index, entry.clone()).is_none() {
                        warn!(index, error = %e, "Skipping malformed alarm entry");
                    } else {
                        debug!(index, "Skipping malformed alarm entry");
                    }
                }
            }
        }
        None
    }

    /// Evaluates the alarms at `now` and drives `player` on edges.
    /// Returns the event describing what changed, if anything.
    pub fn tick(
        &mut self,
        store: &ConfigStore,
        player: &dyn Playback,
        now: NaiveDateTime,
    ) -> Option<DaemonEvent> {
        let active = match store.alarms() {
            Ok(alarms) => self.matching_alarm(&alarms, now),
            Err(e) => {
                warn!(error = %e, "Could not read alarms, treating tick as idle");
                None
            }
        };

        match (self.should_play, active) {
            (false, Some(alarm)) => {
                self.should_play = true;
                Some(enter_window(store, player, alarm))
            }
            (true, None) => {
                self.should_play = false;
                Some(leave_window(store, player))
            }
            (true, Some(_)) => self.reassert(store, player),
            (false, None) => None,
        }
    }

    fn reassert(&self, store: &ConfigStore, player: &dyn Playback) -> Option<DaemonEvent> {
        if !self.reassert_playback {
            return None;
        }
        let restarted = store.with_intent(|intent| {
            if !intent.playing || player.is_active() {
                return Ok(None);
            }
            warn!("Radio stopped inside an alarm window, restarting");
            Ok(Some(player.start()))
        });
        match restarted {
            Ok(Some(Ok(true))) => Some(DaemonEvent::PlaybackRestarted),
            Ok(Some(Err(e))) => {
                error!(error = %e, "Failed to restart radio");
                Some(DaemonEvent::PlaybackFailed(e.to_string()))
            }
            _ => None,
        }
    }
}

fn enter_window(store: &ConfigStore, player: &dyn Playback, alarm: String) -> DaemonEvent {
    info!(alarm = %alarm, "Alarm window opened, starting radio");
    let mut launched = Ok(false);
    let persisted = store.with_intent(|intent| {
        // Recorded even if the launch fails so the next tick retries.
        *intent = Intent {
            playing: true,
            by_alarm: true,
        };
        launched = player.start();
        Ok(())
    });
    if let Err(e) = persisted {
        warn!(error = %e, "Failed to persist playback intent");
    }
    match launched {
        Ok(_) => DaemonEvent::AlarmStarted { alarm },
        Err(e) => {
            error!(alarm = %alarm, error = %e, "Failed to start radio for alarm");
            DaemonEvent::PlaybackFailed(e.to_string())
        }
    }
}

fn leave_window(store: &ConfigStore, player: &dyn Playback) -> DaemonEvent {
    info!("Alarm window closed, stopping radio");
    let persisted = store.with_intent(|intent| {
        player.stop();
        *intent = Intent::default();
        Ok(())
    });
    if let Err(e) = persisted {
        warn!(error = %e, "Failed to persist playback intent");
    }
    DaemonEvent::AlarmEnded
}

/// Brings the player in line with the persisted intent after a restart.
///
/// An intent left behind by an alarm window is dropped; the first tick
/// starts the radio again if that window is still open. A manual "on" is
/// resumed. Returns `true` when a player was launched.
pub fn restore_playback(store: &ConfigStore, player: &dyn Playback) -> Result<bool> {
    store.with_intent(|intent| {
        if intent.by_alarm {
            info!("Dropping playback intent left by an alarm window");
            *intent = Intent::default();
        }
        if intent.playing {
            player.start()
        } else {
            Ok(false)
        }
    })
}

/// Re-evaluates the alarms once per configured tick against the local wall
/// clock and forwards transitions to the daemon event loop.
///
/// Exits when `shutdown` flips to `true` (or its sender is dropped), at most
/// one tick after the signal, or when the event receiver is gone.
pub async fn run(
    store: Arc<ConfigStore>,
    player: Arc<dyn Playback>,
    settings: SchedulerSettings,
    tx: mpsc::Sender<DaemonEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut scheduler = Scheduler::new(&settings);
    let mut ticker = interval(settings.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        tick_ms = settings.tick_interval().as_millis() as u64,
        window_minutes = scheduler.window_minutes,
        "Alarm scheduler started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        let now = Local::now().naive_local();
        if let Some(event) = scheduler.tick(&store, player.as_ref(), now) {
            debug!(?event, playing = scheduler.should_play(), "Scheduler transition");
            if tx.send(event).await.is_err() {
                break;
            }
        }
    }

    info!("Alarm scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::fake::FakePlayer;
    use chrono::{Duration, NaiveDate, Timelike};
    use serde_json::json;
    use tempfile::TempDir;

    fn store_with(alarms: Value) -> (TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("radio-config.json")).unwrap();
        store.set("alarms", alarms).unwrap();
        (dir, store)
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(&SchedulerSettings::default())
    }

    /// 2024-01-01 is a Monday.
    fn monday_at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn alarm(name: &str, on: bool, hour: u32, min: u32) -> Value {
        json!({ "name": name, "days": [0], "on": on, "hour": hour, "min": min })
    }

    // ── edge triggering ───────────────────────────────────────────────────────

    #[test]
    fn starts_once_on_entry_and_stops_once_on_exit() {
        let (_dir, store) = store_with(json!([alarm("wake", true, 7, 55)]));
        let player = FakePlayer::default();
        let mut s = scheduler();

        let mut events = vec![];
        let mut now = monday_at(7, 50, 0);
        while now <= monday_at(8, 10, 0) {
            events.extend(s.tick(&store, &player, now));
            now += Duration::seconds(20);
        }

        assert_eq!(player.starts(), 1);
        assert_eq!(player.stops(), 1);
        assert_eq!(
            events,
            vec![
                DaemonEvent::AlarmStarted {
                    alarm: "wake".to_string()
                },
                DaemonEvent::AlarmEnded,
            ]
        );
    }

    #[test]
    fn edges_follow_the_carried_window_bounds() {
        let (_dir, store) = store_with(json!([alarm("wake", true, 7, 55)]));
        let player = FakePlayer::default();
        let mut s = scheduler();

        assert!(s.tick(&store, &player, monday_at(7, 54, 59)).is_none());
        assert!(s.tick(&store, &player, monday_at(7, 55, 0)).is_some());
        assert!(s.tick(&store, &player, monday_at(8, 5, 0)).is_none());
        assert_eq!(s.tick(&store, &player, monday_at(8, 5, 1)), Some(DaemonEvent::AlarmEnded));
    }

    #[test]
    fn transitions_persist_intent() {
        let (_dir, store) = store_with(json!([alarm("wake", true, 7, 0)]));
        let player = FakePlayer::default();
        let mut s = scheduler();

        s.tick(&store, &player, monday_at(7, 1, 0));
        assert!(store.playing());
        assert!(s.should_play());

        s.tick(&store, &player, monday_at(7, 30, 0));
        assert!(!store.playing());
        assert!(!s.should_play());
    }

    #[test]
    fn disabled_alarms_are_ignored() {
        let (_dir, store) = store_with(json!([alarm("off", false, 7, 0)]));
        let player = FakePlayer::default();
        let mut s = scheduler();

        assert!(s.tick(&store, &player, monday_at(7, 2, 0)).is_none());
        assert_eq!(player.starts(), 0);
    }

    #[test]
    fn first_matching_alarm_in_list_order_wins() {
        let alarms = [
            alarm("later", true, 7, 5),
            alarm("disabled", false, 7, 0),
            alarm("earlier", true, 7, 0),
        ];
        let mut s = scheduler();
        assert_eq!(
            s.matching_alarm(&alarms, monday_at(7, 6, 0)).as_deref(),
            Some("later")
        );
        assert_eq!(
            s.matching_alarm(&alarms, monday_at(7, 2, 0)).as_deref(),
            Some("earlier")
        );
    }

    // ── fault tolerance ───────────────────────────────────────────────────────

    #[test]
    fn malformed_entries_are_skipped() {
        let (_dir, store) = store_with(json!([
            "not an alarm",
            { "name": "broken", "on": true },
            alarm("good", true, 7, 0),
        ]));
        let player = FakePlayer::default();
        let mut s = scheduler();

        let event = s.tick(&store, &player, monday_at(7, 0, 30));
        assert_eq!(
            event,
            Some(DaemonEvent::AlarmStarted {
                alarm: "good".to_string()
            })
        );
    }

    #[test]
    fn malformed_entry_is_reported_once_until_it_changes() {
        let broken = json!({ "name": "broken", "on": false });
        let mut alarms = vec![broken.clone(), alarm("good", true, 7, 0)];
        let mut s = scheduler();

        for second in 0..3 {
            s.matching_alarm(&alarms, monday_at(6, 0, second));
        }
        assert_eq!(s.malformed.len(), 1);
        assert_eq!(s.malformed.get(&0), Some(&broken));

        alarms[0] = alarm("fixed", false, 6, 0);
        s.matching_alarm(&alarms, monday_at(6, 0, 3));
        assert!(s.malformed.is_empty());
    }

    #[test]
    fn unreadable_alarm_list_counts_as_no_match() {
        let (_dir, store) = store_with(json!([alarm("wake", true, 7, 0)]));
        let player = FakePlayer::default();
        let mut s = scheduler();
        s.tick(&store, &player, monday_at(7, 0, 0));

        store.set("alarms", json!("garbage")).unwrap();
        assert_eq!(s.tick(&store, &player, monday_at(7, 1, 0)), Some(DaemonEvent::AlarmEnded));
        assert!(!player.is_active());
    }

    #[test]
    fn start_failure_is_reported_and_retried() {
        let (_dir, store) = store_with(json!([alarm("wake", true, 7, 0)]));
        let player = FakePlayer::default();
        player.fail_next_starts(true);
        let mut s = scheduler();

        let event = s.tick(&store, &player, monday_at(7, 0, 0));
        assert!(matches!(event, Some(DaemonEvent::PlaybackFailed(_))));
        assert!(store.playing());

        player.fail_next_starts(false);
        assert_eq!(
            s.tick(&store, &player, monday_at(7, 0, 1)),
            Some(DaemonEvent::PlaybackRestarted)
        );
        assert!(player.is_active());
    }

    // ── self-healing ──────────────────────────────────────────────────────────

    #[test]
    fn dead_player_is_restarted_inside_the_window() {
        let (_dir, store) = store_with(json!([alarm("wake", true, 7, 0)]));
        let player = FakePlayer::default();
        let mut s = scheduler();
        s.tick(&store, &player, monday_at(7, 0, 0));

        player.crash();
        assert_eq!(
            s.tick(&store, &player, monday_at(7, 0, 1)),
            Some(DaemonEvent::PlaybackRestarted)
        );
        assert_eq!(player.starts(), 2);
        assert!(s.tick(&store, &player, monday_at(7, 0, 2)).is_none());
    }

    #[test]
    fn manual_switch_off_is_not_overridden() {
        let (_dir, store) = store_with(json!([alarm("wake", true, 7, 0)]));
        let player = FakePlayer::default();
        let mut s = scheduler();
        s.tick(&store, &player, monday_at(7, 0, 0));

        player.stop();
        store.set_playing(false).unwrap();
        assert!(s.tick(&store, &player, monday_at(7, 1, 0)).is_none());
        assert_eq!(player.starts(), 1);
    }

    #[test]
    fn reassert_can_be_disabled() {
        let (_dir, store) = store_with(json!([alarm("wake", true, 7, 0)]));
        let player = FakePlayer::default();
        let mut s = Scheduler::new(&SchedulerSettings {
            reassert_playback: false,
            ..SchedulerSettings::default()
        });
        s.tick(&store, &player, monday_at(7, 0, 0));

        player.crash();
        assert!(s.tick(&store, &player, monday_at(7, 0, 1)).is_none());
        assert_eq!(player.starts(), 1);
    }

    #[test]
    fn window_end_clears_alarm_intent() {
        let (_dir, store) = store_with(json!([alarm("wake", true, 7, 0)]));
        let player = FakePlayer::default();
        let mut s = scheduler();

        s.tick(&store, &player, monday_at(7, 0, 0));
        assert_eq!(store.intent(), Intent { playing: true, by_alarm: true });
        s.tick(&store, &player, monday_at(7, 10, 1));
        assert_eq!(store.intent(), Intent::default());
    }

    // ── restart ───────────────────────────────────────────────────────────────

    #[test]
    fn restart_after_the_window_does_not_resume_alarm_playback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radio-config.json");
        {
            let store = ConfigStore::open(&path).unwrap();
            store.set("alarms", json!([alarm("wake", true, 7, 0)])).unwrap();
            let player = FakePlayer::default();
            scheduler().tick(&store, &player, monday_at(7, 1, 0));
            assert!(player.is_active());
            // Daemon stopped inside the window.
            player.teardown();
        }

        let store = ConfigStore::open(&path).unwrap();
        let player = FakePlayer::default();
        assert!(!restore_playback(&store, &player).unwrap());
        assert!(!player.is_active());
        assert!(!store.playing());

        let mut s = scheduler();
        for second in 0..60 {
            assert!(s.tick(&store, &player, monday_at(7, 30, second)).is_none());
        }
        assert!(!player.is_active());
    }

    #[test]
    fn restart_inside_the_window_starts_again_on_first_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radio-config.json");
        {
            let store = ConfigStore::open(&path).unwrap();
            store.set("alarms", json!([alarm("wake", true, 7, 0)])).unwrap();
            scheduler().tick(&store, &FakePlayer::default(), monday_at(7, 1, 0));
        }

        let store = ConfigStore::open(&path).unwrap();
        let player = FakePlayer::default();
        assert!(!restore_playback(&store, &player).unwrap());
        assert_eq!(
            scheduler().tick(&store, &player, monday_at(7, 3, 0)),
            Some(DaemonEvent::AlarmStarted {
                alarm: "wake".to_string()
            })
        );
        assert!(player.is_active());
    }

    #[test]
    fn restart_resumes_manual_playback() {
        let (_dir, store) = store_with(json!([]));
        store.set_playing(true).unwrap();
        let player = FakePlayer::default();

        assert!(restore_playback(&store, &player).unwrap());
        assert!(player.is_active());
        assert!(store.playing());
    }

    // ── concurrency ───────────────────────────────────────────────────────────

    #[test]
    fn appends_during_ticks_are_not_lost() {
        let (_dir, store) = store_with(json!([alarm("wake", true, 7, 0)]));
        let player = FakePlayer::default();

        let appended = std::thread::scope(|sc| {
            let ticker = sc.spawn(|| {
                let mut s = scheduler();
                for second in 0..50 {
                    s.tick(&store, &player, monday_at(7, 0, second % 60));
                }
            });
            let store = &store;
            let writers: Vec<_> = (0..4)
                .map(|_| {
                    sc.spawn(move || {
                        (0..20)
                            .filter(|i| {
                                let new = Alarm::from_value(&alarm(&format!("n{i}"), false, 9, 0))
                                    .unwrap();
                                store.append_alarm(&new).is_ok()
                            })
                            .count()
                    })
                })
                .collect();
            ticker.join().unwrap();
            writers.into_iter().map(|w| w.join().unwrap()).sum::<usize>()
        });

        assert_eq!(store.alarms().unwrap().len(), 1 + appended);
        assert_eq!(player.starts(), 1);
    }

    // ── run loop ──────────────────────────────────────────────────────────────

    fn fast_settings() -> SchedulerSettings {
        SchedulerSettings {
            tick_interval_ms: 100,
            ..SchedulerSettings::default()
        }
    }

    #[tokio::test]
    async fn run_reports_open_window_and_stops_on_signal() {
        let now = Local::now().naive_local();
        let (_dir, store) = store_with(json!([{
            "name": "now", "days": [0, 1, 2, 3, 4, 5, 6], "on": true,
            "hour": now.hour(), "min": now.minute()
        }]));
        let store = Arc::new(store);
        let player = Arc::new(FakePlayer::default());
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run(
            Arc::clone(&store),
            player.clone() as Arc<dyn Playback>,
            fast_settings(),
            tx,
            shutdown_rx,
        ));

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(DaemonEvent::AlarmStarted {
                alarm: "now".to_string()
            })
        );
        assert!(player.is_active());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn run_exits_when_shutdown_sender_is_dropped() {
        let (_dir, store) = store_with(json!([]));
        let (tx, _rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run(
            Arc::new(store),
            Arc::new(FakePlayer::default()),
            fast_settings(),
            tx,
            shutdown_rx,
        ));
        drop(shutdown_tx);

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
