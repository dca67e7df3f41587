mod common;

use tidemark::gateway::events::{Event, MessageAck, ReadStateEntries};
use tidemark::{
    ChannelKind, ChannelOverride, Error, GuildSettings, MentionFlags, MuteConfig,
    NotificationLevel, ReadState, Relationship, RelationshipKind, Snowflake, UnreadIndication,
};

use common::*;

// ─── Ready seeding ──────────────────────────────────────

#[tokio::test]
async fn ready_seeds_both_read_state_shapes() {
    let mut ready = base_ready();
    ready.read_states = vec![
        ReadState {
            channel_id: Snowflake(10),
            last_message_id: Snowflake(100),
            mention_count: 0,
        },
        ReadState {
            channel_id: Snowflake(11),
            last_message_id: Snowflake(101),
            mention_count: 1,
        },
        ReadState {
            channel_id: Snowflake(12),
            last_message_id: Snowflake(102),
            mention_count: 0,
        },
    ];
    ready.read_state_alt = Some(ReadStateEntries {
        entries: vec![ReadState {
            channel_id: Snowflake(13),
            last_message_id: Snowflake(103),
            mention_count: 2,
        }],
    });

    let t = TestMirror::open_with(tidemark::MirrorConfig::default(), ready).await;

    for ch in [10u64, 11, 12, 13] {
        assert!(
            t.mirror.reads().read_state(Snowflake(ch)).is_some(),
            "channel {ch} missing from the read-state map"
        );
    }
    assert_eq!(
        t.mirror.reads().read_state(Snowflake(13)).unwrap().mention_count,
        2
    );
}

// ─── Read-state engine ──────────────────────────────────

#[tokio::test]
async fn mention_increments_counter_and_emits_unread() {
    let mut t = TestMirror::open().await;

    // A channel only counts as unread once something was read in it.
    t.mirror.mark_read(CHANNEL_ID, Snowflake(199));
    assert!(t.try_read_update().await.is_some());

    let mut msg = message(200, CHANNEL_ID, user(2));
    msg.guild_id = GUILD_ID;
    msg.mentions = vec![self_user(), user(3)];
    t.dispatch(Event::MessageCreate(msg)).await;

    let update = t.try_read_update().await.expect("an update event");
    assert!(update.unread);
    assert_eq!(update.read_state.mention_count, 1);
    assert_eq!(update.guild_id, GUILD_ID);

    assert_eq!(
        t.mirror.channel_is_unread(CHANNEL_ID),
        UnreadIndication::Mentioned
    );
}

#[tokio::test]
async fn self_authored_message_is_pre_acked() {
    let mut t = TestMirror::open().await;

    let mut msg = message(201, CHANNEL_ID, self_user());
    msg.guild_id = GUILD_ID;
    msg.mentions = vec![self_user()];
    t.dispatch(Event::MessageCreate(msg)).await;

    let update = t.try_read_update().await.expect("an update event");
    assert!(!update.unread);
    assert_eq!(update.read_state.last_message_id, Snowflake(201));
    assert_eq!(update.read_state.mention_count, 0);

    assert_eq!(t.mirror.channel_is_unread(CHANNEL_ID), UnreadIndication::Read);
}

#[tokio::test]
async fn gateway_ack_after_local_mark_read_is_suppressed() {
    let mut t = TestMirror::open().await;

    t.mirror.mark_read(CHANNEL_ID, Snowflake(300));
    assert!(t.try_read_update().await.is_some());

    t.dispatch(Event::MessageAck(MessageAck {
        channel_id: CHANNEL_ID,
        message_id: Snowflake(300),
    }))
    .await;
    assert!(
        t.try_read_update().await.is_none(),
        "duplicate ack must not emit an update"
    );
}

#[tokio::test]
async fn unread_rolls_up_to_the_guild() {
    let mut t = TestMirror::open().await;

    t.mirror.mark_read(CHANNEL_ID, Snowflake(399));
    assert!(t.try_read_update().await.is_some());

    let mut msg = message(400, CHANNEL_ID, user(2));
    msg.guild_id = GUILD_ID;
    t.dispatch(Event::MessageCreate(msg)).await;
    let _ = t.try_read_update().await;

    let types = [ChannelKind::GuildText];
    assert_eq!(
        t.mirror.guild_is_unread(GUILD_ID, &types),
        UnreadIndication::Unread
    );
    assert_eq!(t.mirror.channel_count_unreads(CHANNEL_ID), 1);

    // A muted guild hides plain unreads...
    t.dispatch(Event::UserGuildSettingsUpdate(GuildSettings {
        guild_id: GUILD_ID,
        muted: true,
        ..GuildSettings::default()
    }))
    .await;
    assert_eq!(
        t.mirror.guild_is_unread(GUILD_ID, &types),
        UnreadIndication::Read
    );

    // ...but mention badges still show through.
    let mut msg = message(401, CHANNEL_ID, user(2));
    msg.guild_id = GUILD_ID;
    msg.mentions = vec![self_user()];
    t.dispatch(Event::MessageCreate(msg)).await;
    let _ = t.try_read_update().await;

    assert_eq!(
        t.mirror.guild_is_unread(GUILD_ID, &types),
        UnreadIndication::Mentioned
    );
}

// ─── Mute index ─────────────────────────────────────────

#[tokio::test]
async fn expired_mute_config_reads_as_unmuted() {
    let mut t = TestMirror::open().await;

    t.dispatch(Event::UserGuildSettingsUpdate(GuildSettings {
        guild_id: GUILD_ID,
        muted: true,
        mute_config: Some(MuteConfig {
            end_time: Some(chrono::Utc::now() - chrono::Duration::minutes(1)),
        }),
        ..GuildSettings::default()
    }))
    .await;

    assert!(!t.mirror.mutes().guild(GUILD_ID, false));
}

// ─── Notification decision ──────────────────────────────

fn guild_message(id: u64, author: tidemark::User) -> tidemark::Message {
    let mut msg = message(id, CHANNEL_ID, author);
    msg.guild_id = GUILD_ID;
    msg
}

#[tokio::test]
async fn everyone_ping_cuts_through_guild_mute() {
    let mut t = TestMirror::open().await;

    t.dispatch(Event::UserGuildSettingsUpdate(GuildSettings {
        guild_id: GUILD_ID,
        muted: true,
        suppress_everyone: false,
        ..GuildSettings::default()
    }))
    .await;

    let mut msg = guild_message(500, user(2));
    msg.mention_everyone = true;
    assert_eq!(
        t.mirror.message_mentions(&msg),
        MentionFlags::MENTIONS | MentionFlags::NOTIFIES
    );
}

#[tokio::test]
async fn suppressed_everyone_in_muted_guild_is_silent() {
    let mut t = TestMirror::open().await;

    t.dispatch(Event::UserGuildSettingsUpdate(GuildSettings {
        guild_id: GUILD_ID,
        muted: true,
        suppress_everyone: true,
        ..GuildSettings::default()
    }))
    .await;

    let mut msg = guild_message(501, user(2));
    msg.mention_everyone = true;
    assert_eq!(t.mirror.message_mentions(&msg), MentionFlags::NONE);
}

#[tokio::test]
async fn only_mentions_override_honors_mentions() {
    let mut t = TestMirror::open().await;

    t.dispatch(Event::UserGuildSettingsUpdate(GuildSettings {
        guild_id: GUILD_ID,
        channel_overrides: vec![ChannelOverride {
            channel_id: CHANNEL_ID,
            muted: false,
            notifications: NotificationLevel::OnlyMentions,
            mute_config: None,
        }],
        ..GuildSettings::default()
    }))
    .await;

    // Not mentioned: nothing.
    let msg = guild_message(502, user(2));
    assert_eq!(t.mirror.message_mentions(&msg), MentionFlags::NONE);

    // Mentioned: full notification, regardless of guild settings.
    let mut msg = guild_message(503, user(2));
    msg.mentions = vec![self_user()];
    assert_eq!(
        t.mirror.message_mentions(&msg),
        MentionFlags::MENTIONS | MentionFlags::NOTIFIES
    );
}

#[tokio::test]
async fn blocked_author_is_always_silent() {
    let mut t = TestMirror::open().await;

    t.dispatch(Event::RelationshipAdd(Relationship {
        user_id: Snowflake(2),
        kind: RelationshipKind::Blocked,
    }))
    .await;

    let mut msg = guild_message(504, user(2));
    msg.mentions = vec![self_user()];
    assert_eq!(t.mirror.message_mentions(&msg), MentionFlags::NONE);
    assert!(t.mirror.user_is_blocked(Snowflake(2)));
}

#[tokio::test]
async fn direct_messages_notify_without_mentions() {
    let t = TestMirror::open().await;

    let msg = message(505, DM_CHANNEL_ID, user(3));
    assert_eq!(t.mirror.message_mentions(&msg), MentionFlags::NOTIFIES);
}

#[tokio::test]
async fn own_messages_never_notify() {
    let t = TestMirror::open().await;

    let mut msg = guild_message(506, self_user());
    msg.mention_everyone = true;
    assert_eq!(t.mirror.message_mentions(&msg), MentionFlags::NONE);
}

// ─── Member requests ────────────────────────────────────

#[tokio::test]
async fn member_requests_coalesce_into_one_command() {
    let mut t = TestMirror::open().await;

    t.mirror.request_member(GUILD_ID, Snowflake(50));
    t.mirror.request_member(GUILD_ID, Snowflake(51));

    let cmd = t.try_command().await.expect("one batched request");
    match cmd {
        tidemark::Command::RequestGuildMembers {
            guild_ids,
            mut user_ids,
            ..
        } => {
            assert_eq!(guild_ids, vec![GUILD_ID]);
            user_ids.sort_unstable();
            assert_eq!(user_ids, vec![Snowflake(50), Snowflake(51)]);
        }
        other => panic!("unexpected command {other:?}"),
    }
    assert!(t.try_command().await.is_none(), "exactly one request");
}

// ─── Offline handle ─────────────────────────────────────

#[tokio::test]
async fn offline_handle_fails_sends_but_keeps_queries() {
    let mut t = TestMirror::open().await;

    t.mirror.mark_read(CHANNEL_ID, Snowflake(599));
    assert!(t.try_read_update().await.is_some());

    let mut msg = message(600, CHANNEL_ID, user(2));
    msg.guild_id = GUILD_ID;
    t.dispatch(Event::MessageCreate(msg)).await;
    let _ = t.try_read_update().await;

    let offline = t.mirror.offline();
    assert!(offline.is_offline());
    assert!(matches!(
        offline.set_status(None, None, vec![]).await,
        Err(Error::Offline)
    ));

    // Cached state still answers.
    assert_eq!(
        offline.channel_is_unread(CHANNEL_ID),
        UnreadIndication::Unread
    );

    // Going back online restores sends.
    let online = offline.online();
    online.set_status(None, None, vec![]).await.unwrap();
    assert!(t.try_command().await.is_some());
}

// ─── Channel filtering ──────────────────────────────────

#[tokio::test]
async fn channels_filters_types_permissions_and_empty_categories() {
    let mut ready = base_ready();
    {
        let gc = &mut ready.guilds[0];

        // A category with one visible child, and an empty one.
        let mut full_cat = text_channel(Snowflake(30), GUILD_ID);
        full_cat.kind = ChannelKind::GuildCategory;
        let mut empty_cat = text_channel(Snowflake(31), GUILD_ID);
        empty_cat.kind = ChannelKind::GuildCategory;
        let mut child = text_channel(Snowflake(32), GUILD_ID);
        child.parent_id = Snowflake(30);

        // A channel the user cannot see.
        let mut hidden = text_channel(Snowflake(33), GUILD_ID);
        hidden.overwrites = vec![tidemark::Overwrite {
            id: GUILD_ID,
            kind: tidemark::OverwriteKind::Role,
            allow: 0,
            deny: tidemark::permissions::VIEW_CHANNEL,
        }];

        gc.channels.extend([full_cat, empty_cat, child, hidden]);
    }

    let t = TestMirror::open_with(tidemark::MirrorConfig::default(), ready).await;

    let types = [ChannelKind::GuildText, ChannelKind::GuildCategory];
    let visible = t.mirror.channels(GUILD_ID, &types);
    let ids: Vec<u64> = visible.iter().map(|c| c.id.0).collect();

    assert!(ids.contains(&10), "plain text channel visible");
    assert!(ids.contains(&30), "category with children kept");
    assert!(ids.contains(&32), "child visible");
    assert!(!ids.contains(&31), "empty category dropped");
    assert!(!ids.contains(&33), "denied channel dropped");

    assert!(t
        .mirror
        .assert_permissions(Snowflake(33), tidemark::permissions::VIEW_CHANNEL)
        .is_err());
}

#[tokio::test]
async fn private_channels_sort_newest_first() {
    let mut ready = base_ready();
    let mut dm_a = dm_channel(Snowflake(21), user(4));
    dm_a.last_message_id = Snowflake(500);
    let mut dm_b = dm_channel(Snowflake(22), user(5));
    dm_b.last_message_id = Snowflake(900);
    let mut empty_group = dm_channel(Snowflake(23), user(6));
    empty_group.kind = ChannelKind::GroupDm;
    empty_group.recipients.clear();
    ready.private_channels.extend([dm_a, dm_b, empty_group]);

    let t = TestMirror::open_with(tidemark::MirrorConfig::default(), ready).await;

    let dms = t.mirror.private_channels();
    let ids: Vec<u64> = dms.iter().map(|c| c.id.0).collect();
    assert!(!ids.contains(&23), "recipient-less group DM dropped");

    let pos_a = ids.iter().position(|&id| id == 21).unwrap();
    let pos_b = ids.iter().position(|&id| id == 22).unwrap();
    assert!(pos_b < pos_a, "most recent DM first");
}
