use anchor_lang::prelude::*;

pub const MAX_ROLE_GRANTS: usize = 16;
pub const MAX_TIERS: usize = 8;
pub const MAX_CREATOR_FEE_BPS: u16 = 10_000;

/// Tier value meaning "no tier assigned".
pub const NO_TIER: u8 = 0;

pub const REGISTRY_SEED: &[u8] = b"tier_registry";
pub const TIER_SEED: &[u8] = b"tier";

/// Capabilities that can be granted to an identity.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
    TierValidator,
    YieldSource,
    Protocol,
}

impl Role {
    pub const fn mask(self) -> u8 {
        1 << (self as u8)
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleGrant {
    pub identity: Pubkey,
    pub roles: u8, // bitmask of Role::mask()
}

impl RoleGrant {
    pub const LEN: usize = 32 + 1;
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TierDefinition {
    pub capacity: u64,     // 0 = unlimited
    pub creation_fee: u64, // one-time, paid in the pool asset
    pub creator_fee_bps: u16,
}

impl TierDefinition {
    pub const LEN: usize = 8 + 8 + 2;
}

/// One creator's assigned tier, stored at `["tier", creator]`.
#[account]
#[derive(Debug, PartialEq, Eq)]
pub struct CreatorTier {
    pub creator: Pubkey,
    pub tier: u8,
    pub updated_at: i64,
    pub bump: u8,
}

impl CreatorTier {
    pub const LEN: usize = 8 + // discriminator
        32 + // creator
        1 +  // tier
        8 +  // updated_at
        1; // bump

    pub fn address(creator: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[TIER_SEED, creator.as_ref()], &crate::ID)
    }

    /// Overwrites the assignment and returns the previous tier.
    pub fn assign(&mut self, tier: u8, now: i64) -> u8 {
        self.updated_at = now;
        std::mem::replace(&mut self.tier, tier)
    }
}

/// Assigned tier of an optional entry; an absent entry means no tier.
pub fn assigned_tier(entry: Option<&CreatorTier>) -> u8 {
    entry.map_or(NO_TIER, |e| e.tier)
}

/// Protocol-wide tier table and role table. Creator assignments live in
/// their own `CreatorTier` accounts. Tier `n` (1 = best) lives at `tiers[n - 1]`.
#[account]
pub struct TierRegistry {
    pub authority: Pubkey,
    pub roles: Vec<RoleGrant>,
    pub tiers: Vec<TierDefinition>,
    pub created_at: i64,
    pub bump: u8,
}

impl TierRegistry {
    pub const LEN: usize = 8 + // discriminator
        32 + // authority
        4 + RoleGrant::LEN * MAX_ROLE_GRANTS + // roles
        4 + TierDefinition::LEN * MAX_TIERS + // tiers
        8 + // created_at
        1; // bump

    pub fn new(authority: Pubkey, created_at: i64, bump: u8) -> Self {
        Self {
            authority,
            roles: vec![RoleGrant {
                identity: authority,
                roles: Role::Admin.mask(),
            }],
            tiers: Vec::new(),
            created_at,
            bump,
        }
    }

    pub fn has_role(&self, identity: &Pubkey, role: Role) -> bool {
        self.roles
            .iter()
            .any(|grant| grant.identity == *identity && grant.roles & role.mask() != 0)
    }

    pub fn grant_role(&mut self, identity: Pubkey, role: Role) -> Result<()> {
        require!(identity != Pubkey::default(), RegistryError::InvalidAddress);

        if let Some(grant) = self.roles.iter_mut().find(|g| g.identity == identity) {
            grant.roles |= role.mask();
            return Ok(());
        }

        require!(self.roles.len() < MAX_ROLE_GRANTS, RegistryError::RoleTableFull);
        self.roles.push(RoleGrant {
            identity,
            roles: role.mask(),
        });
        Ok(())
    }

    pub fn revoke_role(&mut self, identity: &Pubkey, role: Role) -> Result<()> {
        if role == Role::Admin && self.has_role(identity, Role::Admin) {
            let admins = self
                .roles
                .iter()
                .filter(|g| g.roles & Role::Admin.mask() != 0)
                .count();
            require!(admins > 1, RegistryError::LastAdmin);
        }

        if let Some(grant) = self.roles.iter_mut().find(|g| g.identity == *identity) {
            grant.roles &= !role.mask();
        }
        self.roles.retain(|g| g.roles != 0);
        Ok(())
    }

    /// Highest (worst) defined tier number; 0 when no tier is defined.
    pub fn max_tier(&self) -> u8 {
        self.tiers.len() as u8
    }

    pub fn tier_definition(&self, tier: u8) -> Option<&TierDefinition> {
        if tier == NO_TIER {
            return None;
        }
        self.tiers.get(tier as usize - 1)
    }

    /// Updates an existing tier or appends the next one.
    pub fn set_tier_config(&mut self, tier: u8, definition: TierDefinition) -> Result<()> {
        require!(
            definition.creator_fee_bps <= MAX_CREATOR_FEE_BPS,
            RegistryError::InvalidFeeBps
        );
        require!(
            tier != NO_TIER && tier as usize <= MAX_TIERS && tier <= self.max_tier() + 1,
            RegistryError::InvalidTier
        );

        let index = tier as usize - 1;
        if index == self.tiers.len() {
            self.tiers.push(definition);
        } else {
            self.tiers[index] = definition;
        }
        Ok(())
    }

    /// Validates a single assignment. Tier 0 clears a creator's tier.
    pub fn check_assignment(&self, creator: &Pubkey, tier: u8) -> Result<()> {
        require!(*creator != Pubkey::default(), RegistryError::InvalidAddress);
        require!(tier <= self.max_tier(), RegistryError::InvalidTier);
        Ok(())
    }

    /// Validates every assignment of a batch before any of them is written.
    pub fn check_batch(&self, creators: &[Pubkey], tiers: &[u8]) -> Result<()> {
        require!(
            creators.len() == tiers.len(),
            RegistryError::ArrayLengthMismatch
        );
        creators
            .iter()
            .zip(tiers)
            .try_for_each(|(creator, tier)| self.check_assignment(creator, *tier))
    }

    /// A creator may use their own tier or any worse (higher-numbered) one.
    pub fn can_create_pool(&self, assigned: u8, requested_tier: u8) -> bool {
        assigned != NO_TIER
            && requested_tier >= assigned
            && self.tier_definition(requested_tier).is_some()
    }

    pub fn creation_fee(&self, tier: u8) -> Result<u64> {
        self.tier_definition(tier)
            .map(|definition| definition.creation_fee)
            .ok_or_else(|| error!(RegistryError::InvalidTier))
    }
}

#[error_code]
pub enum RegistryError {
    #[msg("Caller lacks the required role")]
    Unauthorized,
    #[msg("Invalid address")]
    InvalidAddress,
    #[msg("Tier is outside the defined range")]
    InvalidTier,
    #[msg("Creator fee basis points must be <= 10000")]
    InvalidFeeBps,
    #[msg("Creator and tier arrays differ in length")]
    ArrayLengthMismatch,
    #[msg("Role table is full")]
    RoleTableFull,
    #[msg("Cannot revoke the last admin")]
    LastAdmin,
}
