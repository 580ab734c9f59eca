use anchor_lang::prelude::*;

pub mod state;

use state::*;

declare_id!("GbwYY6SsoESiS8yuDbHKu7jpYXL9uhC8wUvpbSQrTFhv");

#[program]
pub mod tier_registry {
    use super::*;

    /// Create the registry; the signer becomes its first admin
    pub fn initialize_registry(ctx: Context<InitializeRegistry>) -> Result<()> {
        let clock = Clock::get()?;
        let authority = ctx.accounts.authority.key();

        ctx.accounts
            .registry
            .set_inner(TierRegistry::new(authority, clock.unix_timestamp, ctx.bumps.registry));

        emit!(RoleGranted {
            identity: authority,
            role: Role::Admin,
            granted_by: authority,
        });

        msg!("Tier registry initialized by {}", authority);
        Ok(())
    }

    /// Grant a role to an identity (admin only)
    pub fn grant_role(ctx: Context<AdminOnly>, identity: Pubkey, role: Role) -> Result<()> {
        ctx.accounts.registry.grant_role(identity, role)?;

        emit!(RoleGranted {
            identity,
            role,
            granted_by: ctx.accounts.admin.key(),
        });

        msg!("Granted {:?} to {}", role, identity);
        Ok(())
    }

    /// Revoke a role from an identity (admin only)
    pub fn revoke_role(ctx: Context<AdminOnly>, identity: Pubkey, role: Role) -> Result<()> {
        ctx.accounts.registry.revoke_role(&identity, role)?;

        emit!(RoleRevoked {
            identity,
            role,
            revoked_by: ctx.accounts.admin.key(),
        });

        msg!("Revoked {:?} from {}", role, identity);
        Ok(())
    }

    /// Define or update a tier (admin only). Existing pools keep their
    /// parameters until they are explicitly synced.
    pub fn set_tier_config(
        ctx: Context<AdminOnly>,
        tier: u8,
        capacity: u64,
        creation_fee: u64,
        creator_fee_bps: u16,
    ) -> Result<()> {
        let definition = TierDefinition {
            capacity,
            creation_fee,
            creator_fee_bps,
        };
        ctx.accounts.registry.set_tier_config(tier, definition)?;

        emit!(TierConfigUpdated {
            tier,
            capacity,
            creation_fee,
            creator_fee_bps,
        });

        msg!(
            "Tier {} set: capacity={}, creation_fee={}, creator_fee_bps={}",
            tier,
            capacity,
            creation_fee,
            creator_fee_bps
        );
        Ok(())
    }

    /// Assign a tier to a creator (tier validator only). Tier 0 clears it.
    pub fn set_user_tier(ctx: Context<SetUserTier>, creator: Pubkey, tier: u8) -> Result<()> {
        ctx.accounts.registry.check_assignment(&creator, tier)?;

        let clock = Clock::get()?;
        let entry = &mut ctx.accounts.creator_tier;
        if entry.creator == Pubkey::default() {
            entry.creator = creator;
            entry.bump = ctx.bumps.creator_tier;
        }
        let previous_tier = entry.assign(tier, clock.unix_timestamp);

        emit!(UserTierSet {
            creator,
            previous_tier,
            tier,
        });

        msg!("Creator {} tier {} -> {}", creator, previous_tier, tier);
        Ok(())
    }

    /// Assign tiers to several creators atomically (tier validator only).
    /// Each creator's tier account is passed, writable and in order, as a
    /// remaining account; missing ones are created.
    pub fn batch_set_user_tiers<'info>(
        ctx: Context<'_, '_, 'info, 'info, BatchSetUserTiers<'info>>,
        creators: Vec<Pubkey>,
        tiers: Vec<u8>,
    ) -> Result<()> {
        ctx.accounts.registry.check_batch(&creators, &tiers)?;
        require!(
            ctx.remaining_accounts.len() == creators.len(),
            RegistryError::ArrayLengthMismatch
        );

        let clock = Clock::get()?;
        for ((creator, tier), info) in creators.iter().zip(&tiers).zip(ctx.remaining_accounts) {
            let mut entry = load_or_create_tier(
                info,
                creator,
                &ctx.accounts.validator,
                &ctx.accounts.system_program,
            )?;
            let previous_tier = entry.assign(*tier, clock.unix_timestamp);
            entry.exit(&crate::ID)?;

            emit!(UserTierSet {
                creator: *creator,
                previous_tier,
                tier: *tier,
            });
        }

        msg!("Batch assigned tiers to {} creators", creators.len());
        Ok(())
    }

    /// Read a creator's assigned tier (view function simulation)
    pub fn get_user_tier(ctx: Context<ReadCreatorTier>, _creator: Pubkey) -> Result<u8> {
        Ok(assigned_tier(ctx.accounts.creator_tier.as_deref()))
    }
}

/// Loads `creator`'s tier account from `info`, creating it at its PDA when
/// it does not exist yet.
fn load_or_create_tier<'info>(
    info: &'info AccountInfo<'info>,
    creator: &Pubkey,
    payer: &Signer<'info>,
    system_program: &Program<'info, System>,
) -> Result<Account<'info, CreatorTier>> {
    let (address, bump) = CreatorTier::address(creator);
    require_keys_eq!(info.key(), address, RegistryError::InvalidAddress);
    require!(
        info.is_writable,
        anchor_lang::error::ErrorCode::ConstraintMut
    );

    if info.owner == &crate::ID {
        return Account::try_from(info);
    }

    let seeds: &[&[u8]] = &[TIER_SEED, creator.as_ref(), &[bump]];
    let create_ix = anchor_lang::solana_program::system_instruction::create_account(
        &payer.key(),
        &address,
        Rent::get()?.minimum_balance(CreatorTier::LEN),
        CreatorTier::LEN as u64,
        &crate::ID,
    );
    anchor_lang::solana_program::program::invoke_signed(
        &create_ix,
        &[
            payer.to_account_info(),
            info.clone(),
            system_program.to_account_info(),
        ],
        &[seeds],
    )?;

    let mut entry: Account<'info, CreatorTier> = Account::try_from_unchecked(info)?;
    entry.creator = *creator;
    entry.bump = bump;
    Ok(entry)
}

#[derive(Accounts)]
pub struct InitializeRegistry<'info> {
    #[account(
        init,
        payer = authority,
        space = TierRegistry::LEN,
        seeds = [REGISTRY_SEED],
        bump
    )]
    pub registry: Account<'info, TierRegistry>,
    #[account(mut)]
    pub authority: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct AdminOnly<'info> {
    #[account(
        mut,
        seeds = [REGISTRY_SEED],
        bump = registry.bump,
    )]
    pub registry: Account<'info, TierRegistry>,
    #[account(
        constraint = registry.has_role(&admin.key(), Role::Admin) @ RegistryError::Unauthorized
    )]
    pub admin: Signer<'info>,
}

#[derive(Accounts)]
#[instruction(creator: Pubkey)]
pub struct SetUserTier<'info> {
    #[account(seeds = [REGISTRY_SEED], bump = registry.bump)]
    pub registry: Account<'info, TierRegistry>,
    #[account(
        init_if_needed,
        payer = validator,
        space = CreatorTier::LEN,
        seeds = [TIER_SEED, creator.as_ref()],
        bump
    )]
    pub creator_tier: Account<'info, CreatorTier>,
    #[account(
        mut,
        constraint = registry.has_role(&validator.key(), Role::TierValidator) @ RegistryError::Unauthorized
    )]
    pub validator: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct BatchSetUserTiers<'info> {
    #[account(seeds = [REGISTRY_SEED], bump = registry.bump)]
    pub registry: Account<'info, TierRegistry>,
    #[account(
        mut,
        constraint = registry.has_role(&validator.key(), Role::TierValidator) @ RegistryError::Unauthorized
    )]
    pub validator: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(creator: Pubkey)]
pub struct ReadCreatorTier<'info> {
    #[account(seeds = [TIER_SEED, creator.as_ref()], bump = creator_tier.bump)]
    pub creator_tier: Option<Account<'info, CreatorTier>>,
}

#[event]
pub struct RoleGranted {
    pub identity: Pubkey,
    pub role: Role,
    pub granted_by: Pubkey,
}

#[event]
pub struct RoleRevoked {
    pub identity: Pubkey,
    pub role: Role,
    pub revoked_by: Pubkey,
}

#[event]
pub struct TierConfigUpdated {
    pub tier: u8,
    pub capacity: u64,
    pub creation_fee: u64,
    pub creator_fee_bps: u16,
}

#[event]
pub struct UserTierSet {
    pub creator: Pubkey,
    pub previous_tier: u8,
    pub tier: u8,
}
