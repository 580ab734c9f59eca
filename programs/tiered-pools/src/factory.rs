use anchor_lang::prelude::*;
use anchor_lang::solana_program::hash::hashv;
use anchor_spl::token::{self, Mint, Token, TokenAccount};
use tier_registry::cpi::accounts::AdminOnly;
use tier_registry::program::TierRegistry as TierRegistryProgram;
use tier_registry::state::{
    assigned_tier, CreatorTier, Role, TierDefinition, TierRegistry, NO_TIER, TIER_SEED,
};

use crate::ledger::{require_role, PoolGovernance};
use crate::state::*;

pub fn validate_pool_name(name: &str) -> Result<()> {
    require!(!name.is_empty(), PoolError::InvalidName);
    require!(name.len() <= MAX_POOL_NAME_LEN, PoolError::NameTooLong);
    Ok(())
}

/// Seed component of a name claim. Names may exceed the 32-byte seed limit.
pub fn name_hash(name: &str) -> [u8; 32] {
    hashv(&[name.as_bytes()]).to_bytes()
}

/// Validates a creation request against the registry and returns the tier
/// parameters the new pool inherits. `assigned` is the creator's current tier.
pub fn check_create(
    registry: &TierRegistry,
    assigned: u8,
    name: &str,
    requested_tier: u8,
) -> Result<TierDefinition> {
    validate_pool_name(name)?;

    let definition = *registry
        .tier_definition(requested_tier)
        .ok_or(PoolError::InvalidTier)?;

    require!(
        assigned != NO_TIER && assigned <= requested_tier,
        PoolError::InsufficientTier
    );
    Ok(definition)
}

impl PoolFactory {
    pub fn new(
        registry: Pubkey,
        asset_mint: Pubkey,
        treasury: Pubkey,
        created_at: i64,
        bump: u8,
    ) -> Self {
        Self {
            registry,
            asset_mint,
            treasury,
            template: LedgerTemplate::default(),
            pool_count: 0,
            created_at,
            bump,
        }
    }

    /// Reserves the id of the next pool.
    pub fn next_pool_id(&mut self) -> Result<u64> {
        let pool_id = self.pool_count;
        self.pool_count = pool_id
            .checked_add(1)
            .ok_or(ProgramError::ArithmeticOverflow)?;
        Ok(pool_id)
    }

    /// Replaces the ledger template and bumps its version.
    pub fn set_template(&mut self, min_first_deposit: u64, emergency_delay: i64) -> Result<u32> {
        let template = LedgerTemplate {
            version: self
                .template
                .version
                .checked_add(1)
                .ok_or(ProgramError::ArithmeticOverflow)?,
            min_first_deposit,
            emergency_delay,
        };
        template.validate()?;
        self.template = template;
        Ok(template.version)
    }
}

impl CreatorPools {
    pub fn register(&mut self) -> Result<u32> {
        self.pool_count = self
            .pool_count
            .checked_add(1)
            .ok_or(ProgramError::ArithmeticOverflow)?;
        Ok(self.pool_count)
    }

    /// `pools` must name every pool of the creator exactly once.
    pub fn check_complete(&self, pools: &[Pubkey]) -> Result<()> {
        require!(
            pools.len() == self.pool_count as usize,
            PoolError::IncompletePoolSet
        );
        let mut distinct = pools.to_vec();
        distinct.sort_unstable();
        distinct.dedup();
        require!(distinct.len() == pools.len(), PoolError::IncompletePoolSet);
        Ok(())
    }
}

/// Creates the name claim PDA for `pool`. A claim that already exists means
/// the name is taken.
fn claim_name<'info>(
    claim: &AccountInfo<'info>,
    name: &str,
    bump: u8,
    pool: Pubkey,
    payer: &Signer<'info>,
    system_program: &Program<'info, System>,
) -> Result<()> {
    require!(claim.owner != &crate::ID, PoolError::PoolNameTaken);

    let hash = name_hash(name);
    let seeds: &[&[u8]] = &[NAME_SEED, &hash, &[bump]];
    let create_ix = anchor_lang::solana_program::system_instruction::create_account(
        &payer.key(),
        claim.key,
        Rent::get()?.minimum_balance(PoolNameClaim::LEN),
        PoolNameClaim::LEN as u64,
        &crate::ID,
    );
    anchor_lang::solana_program::program::invoke_signed(
        &create_ix,
        &[
            payer.to_account_info(),
            claim.clone(),
            system_program.to_account_info(),
        ],
        &[seeds],
    )?;

    let mut data = claim.try_borrow_mut_data()?;
    let dst: &mut [u8] = &mut data;
    let mut writer = std::io::Cursor::new(dst);
    PoolNameClaim { pool, bump }.try_serialize(&mut writer)
}

/// Create the factory bound to a registry, asset mint and treasury (admin only)
pub fn initialize_factory(ctx: Context<InitializeFactory>) -> Result<()> {
    let clock = Clock::get()?;
    let factory = PoolFactory::new(
        ctx.accounts.registry.key(),
        ctx.accounts.asset_mint.key(),
        ctx.accounts.treasury.key(),
        clock.unix_timestamp,
        ctx.bumps.factory,
    );
    ctx.accounts.factory.set_inner(factory);

    emit!(FactoryInitialized {
        factory: ctx.accounts.factory.key(),
        registry: ctx.accounts.registry.key(),
        asset_mint: ctx.accounts.asset_mint.key(),
        treasury: ctx.accounts.treasury.key(),
    });

    msg!(
        "Pool factory initialized: registry={}, asset_mint={}",
        ctx.accounts.registry.key(),
        ctx.accounts.asset_mint.key()
    );
    Ok(())
}

/// Create a pool at the requested tier, charging the tier's creation fee
pub fn create_pool(ctx: Context<CreatePool>, name: String, requested_tier: u8) -> Result<Pubkey> {
    let clock = Clock::get()?;
    let creator = ctx.accounts.creator.key();
    let pool_key = ctx.accounts.pool.key();

    let assigned = assigned_tier(ctx.accounts.creator_tier.as_deref());
    let definition = check_create(&ctx.accounts.registry, assigned, &name, requested_tier)?;
    claim_name(
        &ctx.accounts.name_claim.to_account_info(),
        &name,
        ctx.bumps.name_claim,
        pool_key,
        &ctx.accounts.creator,
        &ctx.accounts.system_program,
    )?;

    if definition.creation_fee > 0 {
        let cpi_accounts = token::Transfer {
            from: ctx.accounts.creator_token_account.to_account_info(),
            to: ctx.accounts.treasury.to_account_info(),
            authority: ctx.accounts.creator.to_account_info(),
        };
        let cpi_ctx = CpiContext::new(ctx.accounts.token_program.to_account_info(), cpi_accounts);
        token::transfer(cpi_ctx, definition.creation_fee)?;
    }

    let template = ctx.accounts.factory.template;
    let pool_id = ctx.accounts.factory.next_pool_id()?;

    let creator_pools = &mut ctx.accounts.creator_pools;
    if creator_pools.creator == Pubkey::default() {
        creator_pools.creator = creator;
        creator_pools.bump = ctx.bumps.creator_pools;
    }
    creator_pools.register()?;

    ctx.accounts.record.set_inner(PoolRecord {
        pool: pool_key,
        pool_id,
        name: name.clone(),
        creator,
        tier: requested_tier,
        active: true,
        bump: ctx.bumps.record,
    });

    ctx.accounts.pool.set_inner(ShareLedger::new(LedgerParams {
        factory: ctx.accounts.factory.key(),
        pool_id,
        name: name.clone(),
        creator,
        asset_mint: ctx.accounts.asset_mint.key(),
        vault: ctx.accounts.vault.key(),
        tier: requested_tier,
        capacity: definition.capacity,
        creator_fee_bps: definition.creator_fee_bps,
        template,
        created_at: clock.unix_timestamp,
        bump: ctx.bumps.pool,
        vault_bump: ctx.bumps.vault,
    }));

    emit!(PoolCreated {
        pool: pool_key,
        pool_id,
        name: name.clone(),
        creator,
        tier: requested_tier,
        capacity: definition.capacity,
        creator_fee_bps: definition.creator_fee_bps,
        creation_fee: definition.creation_fee,
        template_version: template.version,
    });

    msg!(
        "Pool {} '{}' created by {} at tier {}",
        pool_id,
        name,
        creator,
        requested_tier
    );
    Ok(pool_key)
}

/// Re-sync one pool with its creator's current tier (tier validator only)
pub fn sync_pool_to_tier(ctx: Context<SyncPool>) -> Result<()> {
    let validator = ctx.accounts.validator.key();
    require_role(&ctx.accounts.registry, &validator, Role::TierValidator)?;

    let tier = assigned_tier(ctx.accounts.creator_tier.as_deref());
    let pool_key = ctx.accounts.pool.key();
    let accounts = &mut *ctx.accounts;
    sync_one(
        &accounts.registry,
        tier,
        pool_key,
        &mut accounts.pool,
        &mut accounts.record,
    );
    Ok(())
}

/// Re-sync every pool of `creator` (tier validator only). Each pool is passed
/// as a writable (pool, record) pair of remaining accounts, and the set must
/// cover all of the creator's pools.
pub fn sync_pools_to_tier<'info>(
    ctx: Context<'_, '_, 'info, 'info, SyncPools<'info>>,
    creator: Pubkey,
) -> Result<()> {
    let validator = ctx.accounts.validator.key();
    require_role(&ctx.accounts.registry, &validator, Role::TierValidator)?;

    let pairs = ctx.remaining_accounts;
    require!(pairs.len() % 2 == 0, PoolError::IncompletePoolSet);
    let pool_keys: Vec<Pubkey> = pairs.iter().step_by(2).map(|info| info.key()).collect();
    ctx.accounts.creator_pools.check_complete(&pool_keys)?;

    let tier = assigned_tier(ctx.accounts.creator_tier.as_deref());
    let factory_key = ctx.accounts.factory.key();
    let mut synced = 0u32;
    for pair in pairs.chunks_exact(2) {
        let (pool_info, record_info) = (&pair[0], &pair[1]);
        require!(
            pool_info.is_writable && record_info.is_writable,
            anchor_lang::error::ErrorCode::ConstraintMut
        );
        let mut pool: Account<'info, ShareLedger> = Account::try_from(pool_info)?;
        let mut record: Account<'info, PoolRecord> = Account::try_from(record_info)?;
        require_keys_eq!(pool.factory, factory_key, PoolError::UnknownPool);
        require_keys_eq!(pool.creator, creator, PoolError::NotCreator);
        require_keys_eq!(record.pool, pool_info.key(), PoolError::UnknownPool);

        if sync_one(
            &ctx.accounts.registry,
            tier,
            pool_info.key(),
            &mut pool,
            &mut record,
        ) {
            synced += 1;
        }
        pool.exit(&crate::ID)?;
        record.exit(&crate::ID)?;
    }

    msg!(
        "Synced {} of {} pools for creator {}",
        synced,
        pool_keys.len(),
        creator
    );
    Ok(())
}

/// Applies `tier` to the pool if it is worse than the pool's current tier.
/// Returns whether anything changed.
fn sync_one(
    registry: &TierRegistry,
    tier: u8,
    pool_key: Pubkey,
    pool: &mut ShareLedger,
    record: &mut PoolRecord,
) -> bool {
    let Some(definition) = registry.tier_definition(tier) else {
        return false;
    };
    if !pool.sync_to_tier(tier, definition) {
        return false;
    }
    record.tier = tier;

    emit!(TierParamsUpdated {
        pool: pool_key,
        tier,
        capacity: pool.capacity,
        creator_fee_bps: pool.creator_fee_bps,
    });

    msg!(
        "Pool {} moved to tier {}: capacity={}, creator_fee_bps={}",
        pool.pool_id,
        tier,
        pool.capacity,
        pool.creator_fee_bps
    );
    true
}

/// Overwrite a pool's capacity (admin only)
pub fn update_pool_cap(ctx: Context<PoolGovernance>, capacity: u64) -> Result<()> {
    let admin = ctx.accounts.authority.key();
    require_role(&ctx.accounts.registry, &admin, Role::Admin)?;

    let pool = &mut ctx.accounts.pool;
    pool.capacity = capacity;

    emit!(TierParamsUpdated {
        pool: pool.key(),
        tier: pool.tier,
        capacity,
        creator_fee_bps: pool.creator_fee_bps,
    });

    msg!("Pool {} capacity set to {}", pool.pool_id, capacity);
    Ok(())
}

/// Rename a pool (creator only). The old name's claim is closed to the creator.
pub fn set_pool_name(ctx: Context<SetPoolName>, name: String) -> Result<()> {
    let pool_key = ctx.accounts.pool.key();
    require_keys_eq!(
        ctx.accounts.creator.key(),
        ctx.accounts.pool.creator,
        PoolError::NotCreator
    );

    validate_pool_name(&name)?;
    claim_name(
        &ctx.accounts.new_name.to_account_info(),
        &name,
        ctx.bumps.new_name,
        pool_key,
        &ctx.accounts.creator,
        &ctx.accounts.system_program,
    )?;

    ctx.accounts.record.name = name.clone();
    let previous = std::mem::replace(&mut ctx.accounts.pool.name, name.clone());

    msg!("Pool {} renamed from '{}' to '{}'", ctx.accounts.pool.pool_id, previous, name);

    emit!(PoolRenamed {
        pool: pool_key,
        previous,
        name,
    });
    Ok(())
}

/// Define or update a tier in the registry (admin only)
pub fn set_tier_config(
    ctx: Context<SetTierConfig>,
    tier: u8,
    capacity: u64,
    creation_fee: u64,
    creator_fee_bps: u16,
) -> Result<()> {
    let admin = ctx.accounts.admin.key();
    require_role(&ctx.accounts.registry, &admin, Role::Admin)?;

    let cpi_accounts = AdminOnly {
        registry: ctx.accounts.registry.to_account_info(),
        admin: ctx.accounts.admin.to_account_info(),
    };
    let cpi_ctx = CpiContext::new(
        ctx.accounts.tier_registry_program.to_account_info(),
        cpi_accounts,
    );
    tier_registry::cpi::set_tier_config(cpi_ctx, tier, capacity, creation_fee, creator_fee_bps)?;

    msg!("Forwarded tier {} config to registry", tier);
    Ok(())
}

/// Replace the template future pools are built from (admin only)
pub fn set_pool_template(
    ctx: Context<FactoryAdmin>,
    min_first_deposit: u64,
    emergency_delay: i64,
) -> Result<()> {
    let admin = ctx.accounts.admin.key();
    require_role(&ctx.accounts.registry, &admin, Role::Admin)?;

    let version = ctx
        .accounts
        .factory
        .set_template(min_first_deposit, emergency_delay)?;

    emit!(PoolTemplateUpdated {
        version,
        min_first_deposit,
        emergency_delay,
    });

    msg!("Pool template v{} installed", version);
    Ok(())
}

/// Point creation fees at a new treasury token account (admin only)
pub fn set_treasury(ctx: Context<SetTreasury>) -> Result<()> {
    let admin = ctx.accounts.admin.key();
    require_role(&ctx.accounts.registry, &admin, Role::Admin)?;

    let treasury = ctx.accounts.new_treasury.key();
    require!(treasury != Pubkey::default(), PoolError::InvalidAddress);

    let factory = &mut ctx.accounts.factory;
    let previous = std::mem::replace(&mut factory.treasury, treasury);

    emit!(TreasuryUpdated { previous, treasury });

    msg!("Treasury updated to {}", treasury);
    Ok(())
}

#[derive(Accounts)]
pub struct InitializeFactory<'info> {
    pub registry: Box<Account<'info, TierRegistry>>,

    #[account(
        mut,
        constraint = registry.has_role(&authority.key(), Role::Admin) @ PoolError::NotAdmin
    )]
    pub authority: Signer<'info>,

    #[account(
        init,
        payer = authority,
        space = PoolFactory::LEN,
        seeds = [FACTORY_SEED],
        bump
    )]
    pub factory: Box<Account<'info, PoolFactory>>,

    #[account(constraint = asset_mint.decimals == ASSET_DECIMALS @ PoolError::InvalidMint)]
    pub asset_mint: Account<'info, Mint>,

    #[account(constraint = treasury.mint == asset_mint.key() @ PoolError::InvalidTreasury)]
    pub treasury: Account<'info, TokenAccount>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(name: String, requested_tier: u8)]
pub struct CreatePool<'info> {
    #[account(mut)]
    pub creator: Signer<'info>,

    #[account(
        mut,
        seeds = [FACTORY_SEED],
        bump = factory.bump,
        has_one = registry @ PoolError::InvalidAddress,
        has_one = asset_mint @ PoolError::InvalidMint,
        has_one = treasury @ PoolError::InvalidTreasury,
    )]
    pub factory: Box<Account<'info, PoolFactory>>,

    pub registry: Box<Account<'info, TierRegistry>>,

    #[account(
        seeds = [TIER_SEED, creator.key().as_ref()],
        bump = creator_tier.bump,
        seeds::program = tier_registry::ID,
    )]
    pub creator_tier: Option<Account<'info, CreatorTier>>,

    #[account(
        init,
        payer = creator,
        space = ShareLedger::LEN,
        seeds = [POOL_SEED, factory.pool_count.to_le_bytes().as_ref()],
        bump
    )]
    pub pool: Box<Account<'info, ShareLedger>>,

    #[account(
        init,
        payer = creator,
        space = PoolRecord::LEN,
        seeds = [RECORD_SEED, pool.key().as_ref()],
        bump
    )]
    pub record: Box<Account<'info, PoolRecord>>,

    /// CHECK: name claim PDA, created by the handler
    #[account(mut, seeds = [NAME_SEED, name_hash(&name).as_ref()], bump)]
    pub name_claim: UncheckedAccount<'info>,

    #[account(
        init_if_needed,
        payer = creator,
        space = CreatorPools::LEN,
        seeds = [CREATOR_POOLS_SEED, creator.key().as_ref()],
        bump
    )]
    pub creator_pools: Box<Account<'info, CreatorPools>>,

    #[account(
        init,
        payer = creator,
        seeds = [VAULT_SEED, pool.key().as_ref()],
        bump,
        token::mint = asset_mint,
        token::authority = pool,
    )]
    pub vault: Box<Account<'info, TokenAccount>>,

    pub asset_mint: Box<Account<'info, Mint>>,

    #[account(
        mut,
        constraint = creator_token_account.mint == asset_mint.key() @ PoolError::InvalidMint
    )]
    pub creator_token_account: Box<Account<'info, TokenAccount>>,

    #[account(mut)]
    pub treasury: Box<Account<'info, TokenAccount>>,

    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct SyncPool<'info> {
    pub validator: Signer<'info>,

    #[account(
        seeds = [FACTORY_SEED],
        bump = factory.bump,
        has_one = registry @ PoolError::InvalidAddress,
    )]
    pub factory: Box<Account<'info, PoolFactory>>,

    pub registry: Box<Account<'info, TierRegistry>>,

    #[account(mut, has_one = factory @ PoolError::UnknownPool)]
    pub pool: Box<Account<'info, ShareLedger>>,

    #[account(mut, seeds = [RECORD_SEED, pool.key().as_ref()], bump = record.bump)]
    pub record: Box<Account<'info, PoolRecord>>,

    #[account(
        seeds = [TIER_SEED, pool.creator.as_ref()],
        bump = creator_tier.bump,
        seeds::program = tier_registry::ID,
    )]
    pub creator_tier: Option<Account<'info, CreatorTier>>,
}

#[derive(Accounts)]
#[instruction(creator: Pubkey)]
pub struct SyncPools<'info> {
    pub validator: Signer<'info>,

    #[account(
        seeds = [FACTORY_SEED],
        bump = factory.bump,
        has_one = registry @ PoolError::InvalidAddress,
    )]
    pub factory: Box<Account<'info, PoolFactory>>,

    pub registry: Box<Account<'info, TierRegistry>>,

    #[account(
        seeds = [TIER_SEED, creator.as_ref()],
        bump = creator_tier.bump,
        seeds::program = tier_registry::ID,
    )]
    pub creator_tier: Option<Account<'info, CreatorTier>>,

    #[account(
        seeds = [CREATOR_POOLS_SEED, creator.as_ref()],
        bump = creator_pools.bump,
    )]
    pub creator_pools: Box<Account<'info, CreatorPools>>,
}

#[derive(Accounts)]
#[instruction(name: String)]
pub struct SetPoolName<'info> {
    #[account(mut)]
    pub creator: Signer<'info>,

    #[account(seeds = [FACTORY_SEED], bump = factory.bump)]
    pub factory: Box<Account<'info, PoolFactory>>,

    #[account(mut, has_one = factory @ PoolError::UnknownPool)]
    pub pool: Box<Account<'info, ShareLedger>>,

    #[account(mut, seeds = [RECORD_SEED, pool.key().as_ref()], bump = record.bump)]
    pub record: Box<Account<'info, PoolRecord>>,

    #[account(
        mut,
        close = creator,
        seeds = [NAME_SEED, name_hash(&pool.name).as_ref()],
        bump = current_name.bump,
    )]
    pub current_name: Account<'info, PoolNameClaim>,

    /// CHECK: name claim PDA for the new name, created by the handler
    #[account(mut, seeds = [NAME_SEED, name_hash(&name).as_ref()], bump)]
    pub new_name: UncheckedAccount<'info>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct SetTierConfig<'info> {
    pub admin: Signer<'info>,

    #[account(
        seeds = [FACTORY_SEED],
        bump = factory.bump,
        has_one = registry @ PoolError::InvalidAddress,
    )]
    pub factory: Box<Account<'info, PoolFactory>>,

    #[account(mut)]
    pub registry: Box<Account<'info, TierRegistry>>,

    pub tier_registry_program: Program<'info, TierRegistryProgram>,
}

#[derive(Accounts)]
pub struct FactoryAdmin<'info> {
    pub admin: Signer<'info>,

    #[account(
        mut,
        seeds = [FACTORY_SEED],
        bump = factory.bump,
        has_one = registry @ PoolError::InvalidAddress,
    )]
    pub factory: Box<Account<'info, PoolFactory>>,

    pub registry: Box<Account<'info, TierRegistry>>,
}

#[derive(Accounts)]
pub struct SetTreasury<'info> {
    pub admin: Signer<'info>,

    #[account(
        mut,
        seeds = [FACTORY_SEED],
        bump = factory.bump,
        has_one = registry @ PoolError::InvalidAddress,
    )]
    pub factory: Box<Account<'info, PoolFactory>>,

    pub registry: Box<Account<'info, TierRegistry>>,

    #[account(
        constraint = new_treasury.mint == factory.asset_mint @ PoolError::InvalidTreasury
    )]
    pub new_treasury: Account<'info, TokenAccount>,
}

#[event]
pub struct FactoryInitialized {
    pub factory: Pubkey,
    pub registry: Pubkey,
    pub asset_mint: Pubkey,
    pub treasury: Pubkey,
}

#[event]
pub struct PoolCreated {
    pub pool: Pubkey,
    pub pool_id: u64,
    pub name: String,
    pub creator: Pubkey,
    pub tier: u8,
    pub capacity: u64,
    pub creator_fee_bps: u16,
    pub creation_fee: u64,
    pub template_version: u32,
}

#[event]
pub struct TierParamsUpdated {
    pub pool: Pubkey,
    pub tier: u8,
    pub capacity: u64,
    pub creator_fee_bps: u16,
}

#[event]
pub struct PoolRenamed {
    pub pool: Pubkey,
    pub previous: String,
    pub name: String,
}

#[event]
pub struct PoolTemplateUpdated {
    pub version: u32,
    pub min_first_deposit: u64,
    pub emergency_delay: i64,
}

#[event]
pub struct TreasuryUpdated {
    pub previous: Pubkey,
    pub treasury: Pubkey,
}
