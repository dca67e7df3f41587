use crate::models::{Guild, Member, Overwrite, OverwriteKind, RoleId, UserId};

/// Permission bitfield. Each permission is a single bit in a u64.
pub type Permissions = u64;

pub const CREATE_INVITES: Permissions = 1 << 0;
pub const KICK_MEMBERS: Permissions = 1 << 1;
pub const BAN_MEMBERS: Permissions = 1 << 2;
pub const ADMINISTRATOR: Permissions = 1 << 3;
pub const MANAGE_CHANNELS: Permissions = 1 << 4;
pub const MANAGE_GUILD: Permissions = 1 << 5;
pub const ADD_REACTIONS: Permissions = 1 << 6;
pub const VIEW_AUDIT_LOG: Permissions = 1 << 7;
pub const PRIORITY_SPEAKER: Permissions = 1 << 8;
pub const STREAM: Permissions = 1 << 9;
pub const VIEW_CHANNEL: Permissions = 1 << 10;
pub const SEND_MESSAGES: Permissions = 1 << 11;
pub const MANAGE_MESSAGES: Permissions = 1 << 13;
pub const EMBED_LINKS: Permissions = 1 << 14;
pub const ATTACH_FILES: Permissions = 1 << 15;
pub const READ_MESSAGE_HISTORY: Permissions = 1 << 16;
pub const MENTION_EVERYONE: Permissions = 1 << 17;
pub const USE_EXTERNAL_EMOJIS: Permissions = 1 << 18;
pub const CONNECT: Permissions = 1 << 20;
pub const SPEAK: Permissions = 1 << 21;
pub const MUTE_MEMBERS: Permissions = 1 << 22;
pub const DEAFEN_MEMBERS: Permissions = 1 << 23;
pub const CHANGE_NICKNAME: Permissions = 1 << 26;
pub const MANAGE_NICKNAMES: Permissions = 1 << 27;
pub const MANAGE_ROLES: Permissions = 1 << 28;
pub const MANAGE_WEBHOOKS: Permissions = 1 << 29;
pub const MANAGE_EMOJIS: Permissions = 1 << 30;
pub const MANAGE_THREADS: Permissions = 1 << 34;
pub const MODERATE_MEMBERS: Permissions = 1 << 40;

pub const ALL: Permissions = u64::MAX;

/// Check if a permission bitfield has a specific permission.
/// ADMINISTRATOR bypasses all checks.
#[inline]
pub fn has(permissions: Permissions, required: Permissions) -> bool {
    if permissions & ADMINISTRATOR != 0 {
        return true;
    }
    permissions & required == required
}

/// Compute a member's effective guild-level permissions.
///
/// Algorithm: start with the everyone-role base -> OR all member role
/// permissions -> ADMIN check. The guild owner gets all permissions.
pub fn compute_base(guild: &Guild, member: &Member) -> Permissions {
    if guild.owner_id == member.user.id {
        return ALL;
    }

    let mut perms = guild.everyone_role().map(|r| r.permissions).unwrap_or(0);
    for role in &guild.roles {
        if member.roles.contains(&role.id) {
            perms |= role.permissions;
        }
    }

    if perms & ADMINISTRATOR != 0 {
        return ALL;
    }

    perms
}

/// Apply channel-level overwrites to a base permission set.
///
/// Process: base perms -> everyone overwrite -> aggregated role overwrites
/// -> member overwrite. ADMINISTRATOR bypasses all overwrites.
pub fn apply_overwrites(
    base: Permissions,
    overwrites: &[Overwrite],
    member_roles: &[RoleId],
    user_id: UserId,
    everyone_id: RoleId,
) -> Permissions {
    if base & ADMINISTRATOR != 0 || base == ALL {
        return ALL;
    }

    let mut perms = base;

    for ow in overwrites {
        if ow.kind == OverwriteKind::Role && ow.id == everyone_id {
            perms &= !ow.deny;
            perms |= ow.allow;
        }
    }

    let mut role_allow: Permissions = 0;
    let mut role_deny: Permissions = 0;
    for ow in overwrites {
        if ow.kind == OverwriteKind::Role && ow.id != everyone_id && member_roles.contains(&ow.id) {
            role_allow |= ow.allow;
            role_deny |= ow.deny;
        }
    }
    perms &= !role_deny;
    perms |= role_allow;

    for ow in overwrites {
        if ow.kind == OverwriteKind::Member && ow.id == user_id {
            perms &= !ow.deny;
            perms |= ow.allow;
        }
    }

    perms
}
