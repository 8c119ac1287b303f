//! Control-plane state machine: validates each command against the room and
//! settings, applies it, and emits the corresponding events. Authorization
//! failures reply to the sender only and never mutate state.

use uuid::Uuid;

use crate::protocol::{Command, Event, ParticipantInfo};
use crate::server::ServerContext;
use crate::settings::SettingsPatch;

pub async fn handle_command(ctx: &ServerContext, sender: Uuid, cmd: Command) {
    match cmd {
        Command::StartSharing => start_sharing(ctx, sender).await,
        Command::StopSharing => stop_sharing(ctx, sender).await,
        Command::RequestPresenter => request_presenter(ctx, sender).await,
        Command::SettingsUpdate { settings } => settings_update(ctx, sender, settings).await,
        Command::ChatMessage { message } => chat_message(ctx, sender, message).await,
        Command::GetFrame => get_frame(ctx, sender).await,
        Command::GetStats => {
            let stats = ctx.stats().await;
            ctx.broadcaster.send_to(sender, &Event::Stats { stats }).await;
        }
        Command::GetMonitors => {
            ctx.broadcaster
                .send_to(
                    sender,
                    &Event::Monitors {
                        monitors: ctx.monitors.clone(),
                    },
                )
                .await;
        }
        Command::GetSettings => {
            let settings = ctx.settings.read().unwrap().clone();
            ctx.broadcaster
                .send_to(sender, &Event::Settings { settings })
                .await;
        }
        Command::Join { .. } => {
            // Join is only valid as a connection's first message.
            ctx.broadcaster
                .send_to(
                    sender,
                    &Event::Error {
                        message: "already joined".into(),
                    },
                )
                .await;
        }
    }
}

async fn start_sharing(ctx: &ServerContext, sender: Uuid) {
    let Some(presenter) = require_presenter(ctx, sender, "only the presenter can share the screen").await
    else {
        return;
    };

    ctx.capture.start();
    tracing::info!(participant = %sender, "presentation started");
    let dead = ctx
        .broadcaster
        .broadcast(&Event::PresentationStarted { presenter })
        .await;
    ctx.drop_participants(dead).await;
}

async fn stop_sharing(ctx: &ServerContext, sender: Uuid) {
    let Some(presenter) = require_presenter(ctx, sender, "only the presenter can stop sharing").await
    else {
        return;
    };

    ctx.capture.stop_async().await;
    tracing::info!(participant = %sender, "presentation stopped");
    let dead = ctx
        .broadcaster
        .broadcast(&Event::PresentationStopped { presenter })
        .await;
    ctx.drop_participants(dead).await;
}

async fn request_presenter(ctx: &ServerContext, sender: Uuid) {
    // Unconditional takeover; no consent step.
    let Some(new_presenter) = ctx.room.write().await.request_presenter(sender) else {
        return;
    };
    tracing::info!(participant = %sender, name = %new_presenter.name, "presenter changed");

    let users = ctx.participant_list().await;
    let dead = ctx
        .broadcaster
        .broadcast(&Event::PresenterChanged {
            new_presenter: ParticipantInfo::new(&new_presenter, true),
            users,
        })
        .await;
    ctx.drop_participants(dead).await;
}

async fn settings_update(ctx: &ServerContext, sender: Uuid, patch: SettingsPatch) {
    if require_presenter(ctx, sender, "only the presenter can change settings")
        .await
        .is_none()
    {
        return;
    }

    if let Some(monitor) = patch.monitor {
        if monitor >= ctx.monitors.len() {
            ctx.broadcaster
                .send_to(
                    sender,
                    &Event::Error {
                        message: format!("unknown monitor {monitor}"),
                    },
                )
                .await;
            return;
        }
    }

    let result = {
        let mut settings = ctx.settings.write().unwrap();
        settings.apply(&patch).map(|_| settings.clone())
    };

    match result {
        Ok(settings) => {
            tracing::info!(?settings, "settings updated");
            let dead = ctx
                .broadcaster
                .broadcast(&Event::SettingsUpdated { settings })
                .await;
            ctx.drop_participants(dead).await;
        }
        Err(e) => {
            ctx.broadcaster
                .send_to(
                    sender,
                    &Event::Error {
                        message: e.to_string(),
                    },
                )
                .await;
        }
    }
}

async fn chat_message(ctx: &ServerContext, sender: Uuid, message: String) {
    let text = message.trim();
    if text.is_empty() {
        // Whitespace-only chat is dropped silently: no entry, no broadcast.
        return;
    }

    let (user, entry) = {
        let mut room = ctx.room.write().await;
        let Some(participant) = room.participant(sender).cloned() else {
            return;
        };
        let entry = room.push_chat(participant.name.clone(), text.to_string());
        (
            ParticipantInfo::new(&participant, room.is_presenter(sender)),
            entry,
        )
    };

    let dead = ctx
        .broadcaster
        .broadcast(&Event::ChatMessage {
            user,
            message: entry.text,
            timestamp: entry.timestamp,
        })
        .await;
    ctx.drop_participants(dead).await;
}

async fn get_frame(ctx: &ServerContext, sender: Uuid) {
    let stats = ctx.stats().await;
    let snapshot = ctx.cache.snapshot();
    let event = ctx.frame_event(snapshot.as_deref(), stats);
    ctx.broadcaster.send_to(sender, &event).await;
}

/// Authorization gate for presenter-only commands. On failure an `error`
/// event goes to the sender and nothing else happens.
async fn require_presenter(
    ctx: &ServerContext,
    sender: Uuid,
    denial: &str,
) -> Option<ParticipantInfo> {
    let room = ctx.room.read().await;
    if room.is_presenter(sender) {
        room.participant(sender)
            .map(|p| ParticipantInfo::new(p, true))
    } else {
        drop(room);
        ctx.broadcaster
            .send_to(
                sender,
                &Event::Error {
                    message: denial.into(),
                },
            )
            .await;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::join_participant;
    use crate::settings::{Settings, SettingsPatch};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_settings() -> Settings {
        Settings {
            fps: 10,
            width: 64,
            height: 48,
            quality: 50,
            monitor: 0,
        }
    }

    async fn two_peer_room() -> (
        Arc<ServerContext>,
        Uuid,
        mpsc::UnboundedReceiver<String>,
        Uuid,
        mpsc::UnboundedReceiver<String>,
    ) {
        let ctx = ServerContext::new(test_settings(), true);
        let (a, mut rx_a) = join_participant(&ctx, Some("A".into())).await;
        let (b, mut rx_b) = join_participant(&ctx, Some("B".into())).await;
        drain(&mut rx_a);
        drain(&mut rx_b);
        (ctx, a, rx_a, b, rx_b)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(json) = rx.try_recv() {
            out.push(serde_json::from_str(&json).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_viewer_settings_update_rejected_and_unchanged() {
        let (ctx, _a, mut rx_a, b, mut rx_b) = two_peer_room().await;
        let before = ctx.settings.read().unwrap().clone();

        let patch = SettingsPatch {
            fps: Some(5),
            ..Default::default()
        };
        handle_command(&ctx, b, Command::SettingsUpdate { settings: patch }).await;

        assert_eq!(*ctx.settings.read().unwrap(), before);
        let b_events = drain(&mut rx_b);
        assert_eq!(b_events.len(), 1);
        assert_eq!(b_events[0]["type"], "error");
        // Nobody else heard anything.
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_presenter_settings_update_applies_and_broadcasts() {
        let (ctx, a, _rx_a, _b, mut rx_b) = two_peer_room().await;

        let patch = SettingsPatch {
            fps: Some(15),
            quality: Some(70),
            ..Default::default()
        };
        handle_command(&ctx, a, Command::SettingsUpdate { settings: patch }).await;

        let settings = ctx.settings.read().unwrap().clone();
        assert_eq!(settings.fps, 15);
        assert_eq!(settings.quality, 70);

        let events = drain(&mut rx_b);
        assert_eq!(events[0]["type"], "settings_updated");
        assert_eq!(events[0]["settings"]["fps"], 15);
    }

    #[tokio::test]
    async fn test_invalid_settings_value_rejected_with_error() {
        let (ctx, a, mut rx_a, _b, mut rx_b) = two_peer_room().await;
        let before = ctx.settings.read().unwrap().clone();

        let patch = SettingsPatch {
            quality: Some(0),
            ..Default::default()
        };
        handle_command(&ctx, a, Command::SettingsUpdate { settings: patch }).await;

        assert_eq!(*ctx.settings.read().unwrap(), before);
        assert_eq!(drain(&mut rx_a)[0]["type"], "error");
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_monitor_rejected() {
        let (ctx, a, mut rx_a, _b, _rx_b) = two_peer_room().await;

        let patch = SettingsPatch {
            monitor: Some(99),
            ..Default::default()
        };
        handle_command(&ctx, a, Command::SettingsUpdate { settings: patch }).await;

        assert_eq!(ctx.settings.read().unwrap().monitor, 0);
        let events = drain(&mut rx_a);
        assert_eq!(events[0]["type"], "error");
    }

    #[tokio::test]
    async fn test_whitespace_chat_is_silently_dropped() {
        let (ctx, _a, mut rx_a, b, mut rx_b) = two_peer_room().await;

        handle_command(
            &ctx,
            b,
            Command::ChatMessage {
                message: "   \t\n ".into(),
            },
        )
        .await;

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
        assert!(ctx.room.read().await.chat().is_empty());
    }

    #[tokio::test]
    async fn test_chat_reaches_everyone_including_sender() {
        let (ctx, _a, mut rx_a, b, mut rx_b) = two_peer_room().await;

        handle_command(
            &ctx,
            b,
            Command::ChatMessage {
                message: "  hello  ".into(),
            },
        )
        .await;

        for rx in [&mut rx_a, &mut rx_b] {
            let events = drain(rx);
            assert_eq!(events[0]["type"], "chat_message");
            assert_eq!(events[0]["message"], "hello");
            assert_eq!(events[0]["user"]["name"], "B");
        }
        assert_eq!(ctx.room.read().await.chat().len(), 1);
    }

    #[tokio::test]
    async fn test_viewer_cannot_start_sharing() {
        let (ctx, _a, mut rx_a, b, mut rx_b) = two_peer_room().await;

        handle_command(&ctx, b, Command::StartSharing).await;

        assert!(!ctx.capture.is_running());
        assert_eq!(drain(&mut rx_b)[0]["type"], "error");
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_presenter_start_stop_sharing() {
        let (ctx, a, _rx_a, _b, mut rx_b) = two_peer_room().await;

        handle_command(&ctx, a, Command::StartSharing).await;
        assert!(ctx.capture.is_running());
        let events = drain(&mut rx_b);
        assert_eq!(events[0]["type"], "presentation_started");
        assert_eq!(events[0]["presenter"]["name"], "A");

        handle_command(&ctx, a, Command::StopSharing).await;
        assert!(!ctx.capture.is_running());
        assert_eq!(drain(&mut rx_b)[0]["type"], "presentation_stopped");
    }

    #[tokio::test]
    async fn test_request_presenter_takes_over() {
        let (ctx, a, mut rx_a, b, _rx_b) = two_peer_room().await;

        handle_command(&ctx, b, Command::RequestPresenter).await;

        let room = ctx.room.read().await;
        assert!(room.is_presenter(b));
        assert!(!room.is_presenter(a));
        drop(room);

        let events = drain(&mut rx_a);
        assert_eq!(events[0]["type"], "presenter_changed");
        assert_eq!(events[0]["new_presenter"]["name"], "B");
        assert_eq!(events[0]["users"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_frame_before_any_capture_is_null() {
        let (ctx, _a, _rx_a, b, mut rx_b) = two_peer_room().await;

        handle_command(&ctx, b, Command::GetFrame).await;

        let events = drain(&mut rx_b);
        assert_eq!(events[0]["type"], "frame");
        assert!(events[0]["frame"].is_null());
        assert_eq!(events[0]["stats"]["frame_count"], 0);
    }

    #[tokio::test]
    async fn test_get_monitors_and_stats_reply_to_sender_only() {
        let (ctx, _a, mut rx_a, b, mut rx_b) = two_peer_room().await;

        handle_command(&ctx, b, Command::GetMonitors).await;
        handle_command(&ctx, b, Command::GetStats).await;
        handle_command(&ctx, b, Command::GetSettings).await;

        let events = drain(&mut rx_b);
        assert_eq!(events[0]["type"], "monitors");
        assert_eq!(events[0]["monitors"][0]["name"], "Test Monitor");
        assert_eq!(events[1]["type"], "stats");
        assert_eq!(events[1]["participant_count"], 2);
        assert_eq!(events[2]["type"], "settings");
        assert_eq!(events[2]["settings"]["quality"], 50);

        assert!(drain(&mut rx_a).is_empty());
    }
}
