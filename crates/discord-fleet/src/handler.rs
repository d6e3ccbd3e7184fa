//! Serenity event handlers

use std::sync::Arc;

use serenity::all::{
    ConnectionStage, Context, Event, EventHandler, Guild, GuildId, RawEventHandler, Ready, ResumedEvent,
    ShardStageUpdateEvent, UnavailableGuild,
};
use serenity::async_trait;
use tracing::{debug, info};

use crate::cluster::ClusterBroadcast;
use crate::events::{DISPATCH_OP, EventClassifier, LifecycleEvent};
use crate::guilds::{GuildInfo, GuildLeaver, GuildMembership};
use crate::metrics::MetricsSink;
use crate::notify::Notifier;
use crate::store::FleetStore;

/// Turns serenity callbacks into lifecycle events and guild changes.
pub struct FleetHandler<S, B, M, N, L> {
    classifier: Arc<EventClassifier<M, N>>,
    guilds: Arc<GuildMembership<S, B, M, N, L>>,
}

impl<S, B, M, N, L> FleetHandler<S, B, M, N, L> {
    pub fn new(classifier: Arc<EventClassifier<M, N>>, guilds: Arc<GuildMembership<S, B, M, N, L>>) -> Self {
        Self { classifier, guilds }
    }
}

/// Lifecycle signal for a shard stage transition, if it is one we report.
pub fn stage_event(shard_id: u32, stage: ConnectionStage) -> Option<LifecycleEvent> {
    match stage {
        ConnectionStage::Connected => Some(LifecycleEvent::ShardConnect(shard_id)),
        ConnectionStage::Disconnected => Some(LifecycleEvent::ShardDisconnect(shard_id)),
        _ => None,
    }
}

#[async_trait]
impl<S, B, M, N, L> EventHandler for FleetHandler<S, B, M, N, L>
where
    S: FleetStore,
    B: ClusterBroadcast,
    M: MetricsSink,
    N: Notifier,
    L: GuildLeaver,
{
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            shard_id = ctx.shard_id.0,
            guilds = ready.guilds.len(),
            "Shard ready as {}",
            ready.user.name
        );
        self.classifier.handle(LifecycleEvent::ShardReady(ctx.shard_id.0)).await;
    }

    async fn cache_ready(&self, _ctx: Context, guilds: Vec<GuildId>) {
        info!(guilds = guilds.len(), "Cluster ready");
        self.classifier.handle(LifecycleEvent::Ready).await;
    }

    async fn shard_stage_update(&self, _ctx: Context, event: ShardStageUpdateEvent) {
        debug!(shard_id = event.shard_id.0, old = ?event.old, new = ?event.new, "Shard stage changed");
        if let Some(lifecycle) = stage_event(event.shard_id.0, event.new) {
            self.classifier.handle(lifecycle).await;
        }
    }

    async fn resume(&self, ctx: Context, _event: ResumedEvent) {
        self.classifier.handle(LifecycleEvent::ShardResume(ctx.shard_id.0)).await;
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, is_new: Option<bool>) {
        if is_new != Some(true) {
            return;
        }
        let info = GuildInfo {
            id: guild.id.get(),
            name: guild.name.clone(),
        };
        self.guilds.on_join(&info).await;
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, full: Option<Guild>) {
        // An unavailable guild is an outage, not a removal.
        if incomplete.unavailable {
            return;
        }
        let info = GuildInfo {
            id: incomplete.id.get(),
            name: full.map(|g| g.name).unwrap_or_default(),
        };
        self.guilds.on_remove(&info).await;
    }
}

/// Counts every dispatch frame by type.
pub struct DispatchCounter<M, N> {
    classifier: Arc<EventClassifier<M, N>>,
}

impl<M, N> DispatchCounter<M, N> {
    pub fn new(classifier: Arc<EventClassifier<M, N>>) -> Self {
        Self { classifier }
    }
}

/// Dispatch type of a raw gateway event.
///
/// Read off the variant; serenity's own `Event::name` serialises the whole
/// payload to find it.
pub fn dispatch_kind(event: &Event) -> Option<String> {
    let name = match event {
        Event::Unknown(unknown) => return Some(unknown.kind.clone()),
        Event::CommandPermissionsUpdate(_) => "APPLICATION_COMMAND_PERMISSIONS_UPDATE",
        Event::AutoModRuleCreate(_) => "AUTO_MODERATION_RULE_CREATE",
        Event::AutoModRuleUpdate(_) => "AUTO_MODERATION_RULE_UPDATE",
        Event::AutoModRuleDelete(_) => "AUTO_MODERATION_RULE_DELETE",
        Event::AutoModActionExecution(_) => "AUTO_MODERATION_ACTION_EXECUTION",
        Event::ChannelCreate(_) => "CHANNEL_CREATE",
        Event::ChannelDelete(_) => "CHANNEL_DELETE",
        Event::ChannelPinsUpdate(_) => "CHANNEL_PINS_UPDATE",
        Event::ChannelUpdate(_) => "CHANNEL_UPDATE",
        Event::GuildAuditLogEntryCreate(_) => "GUILD_AUDIT_LOG_ENTRY_CREATE",
        Event::GuildBanAdd(_) => "GUILD_BAN_ADD",
        Event::GuildBanRemove(_) => "GUILD_BAN_REMOVE",
        Event::GuildCreate(_) => "GUILD_CREATE",
        Event::GuildDelete(_) => "GUILD_DELETE",
        Event::GuildEmojisUpdate(_) => "GUILD_EMOJIS_UPDATE",
        Event::GuildIntegrationsUpdate(_) => "GUILD_INTEGRATIONS_UPDATE",
        Event::GuildMemberAdd(_) => "GUILD_MEMBER_ADD",
        Event::GuildMemberRemove(_) => "GUILD_MEMBER_REMOVE",
        Event::GuildMemberUpdate(_) => "GUILD_MEMBER_UPDATE",
        Event::GuildMembersChunk(_) => "GUILD_MEMBERS_CHUNK",
        Event::GuildRoleCreate(_) => "GUILD_ROLE_CREATE",
        Event::GuildRoleDelete(_) => "GUILD_ROLE_DELETE",
        Event::GuildRoleUpdate(_) => "GUILD_ROLE_UPDATE",
        Event::GuildStickersUpdate(_) => "GUILD_STICKERS_UPDATE",
        Event::GuildUpdate(_) => "GUILD_UPDATE",
        Event::InviteCreate(_) => "INVITE_CREATE",
        Event::InviteDelete(_) => "INVITE_DELETE",
        Event::MessageCreate(_) => "MESSAGE_CREATE",
        Event::MessageDelete(_) => "MESSAGE_DELETE",
        Event::MessageDeleteBulk(_) => "MESSAGE_DELETE_BULK",
        Event::MessageUpdate(_) => "MESSAGE_UPDATE",
        Event::PresenceUpdate(_) => "PRESENCE_UPDATE",
        Event::ReactionAdd(_) => "MESSAGE_REACTION_ADD",
        Event::ReactionRemove(_) => "MESSAGE_REACTION_REMOVE",
        Event::ReactionRemoveAll(_) => "MESSAGE_REACTION_REMOVE_ALL",
        Event::ReactionRemoveEmoji(_) => "MESSAGE_REACTION_REMOVE_EMOJI",
        Event::Ready(_) => "READY",
        Event::Resumed(_) => "RESUMED",
        Event::SoundboardSounds(_) => "SOUNDBOARD_SOUNDS",
        Event::SoundboardSoundCreate(_) => "GUILD_SOUNDBOARD_SOUND_CREATE",
        Event::SoundboardSoundUpdate(_) => "GUILD_SOUNDBOARD_SOUND_UPDATE",
        Event::SoundboardSoundsUpdate(_) => "GUILD_SOUNDBOARD_SOUNDS_UPDATE",
        Event::SoundboardSoundDelete(_) => "GUILD_SOUNDBOARD_SOUND_DELETE",
        Event::TypingStart(_) => "TYPING_START",
        Event::UserUpdate(_) => "USER_UPDATE",
        Event::VoiceStateUpdate(_) => "VOICE_STATE_UPDATE",
        Event::VoiceServerUpdate(_) => "VOICE_SERVER_UPDATE",
        Event::VoiceChannelStatusUpdate(_) => "VOICE_CHANNEL_STATUS_UPDATE",
        Event::WebhookUpdate(_) => "WEBHOOKS_UPDATE",
        Event::InteractionCreate(_) => "INTERACTION_CREATE",
        Event::IntegrationCreate(_) => "INTEGRATION_CREATE",
        Event::IntegrationUpdate(_) => "INTEGRATION_UPDATE",
        Event::IntegrationDelete(_) => "INTEGRATION_DELETE",
        Event::StageInstanceCreate(_) => "STAGE_INSTANCE_CREATE",
        Event::StageInstanceUpdate(_) => "STAGE_INSTANCE_UPDATE",
        Event::StageInstanceDelete(_) => "STAGE_INSTANCE_DELETE",
        Event::ThreadCreate(_) => "THREAD_CREATE",
        Event::ThreadUpdate(_) => "THREAD_UPDATE",
        Event::ThreadDelete(_) => "THREAD_DELETE",
        Event::ThreadListSync(_) => "THREAD_LIST_SYNC",
        Event::ThreadMemberUpdate(_) => "THREAD_MEMBER_UPDATE",
        Event::ThreadMembersUpdate(_) => "THREAD_MEMBERS_UPDATE",
        Event::GuildScheduledEventCreate(_) => "GUILD_SCHEDULED_EVENT_CREATE",
        Event::GuildScheduledEventUpdate(_) => "GUILD_SCHEDULED_EVENT_UPDATE",
        Event::GuildScheduledEventDelete(_) => "GUILD_SCHEDULED_EVENT_DELETE",
        Event::GuildScheduledEventUserAdd(_) => "GUILD_SCHEDULED_EVENT_USER_ADD",
        Event::GuildScheduledEventUserRemove(_) => "GUILD_SCHEDULED_EVENT_USER_REMOVE",
        Event::EntitlementCreate(_) => "ENTITLEMENT_CREATE",
        Event::EntitlementUpdate(_) => "ENTITLEMENT_UPDATE",
        Event::EntitlementDelete(_) => "ENTITLEMENT_DELETE",
        Event::MessagePollVoteAdd(_) => "MESSAGE_POLL_VOTE_ADD",
        Event::MessagePollVoteRemove(_) => "MESSAGE_POLL_VOTE_REMOVE",
        _ => return None,
    };
    Some(name.to_string())
}

#[async_trait]
impl<M: MetricsSink, N: Notifier> RawEventHandler for DispatchCounter<M, N> {
    async fn raw_event(&self, _ctx: Context, event: Event) {
        let kind = dispatch_kind(&event);
        self.classifier
            .handle(LifecycleEvent::Dispatch {
                op: DISPATCH_OP,
                kind,
            })
            .await;
    }
}
