use anchor_lang::prelude::*;
use anchor_spl::token::{self, Token, TokenAccount};
use tier_registry::state::{Role, TierDefinition, TierRegistry, NO_TIER};

use crate::state::*;

/// How a yield push was divided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct YieldSplit {
    pub creator_fee: u64,
    pub holder_yield: u64,
    pub index_delta: u128,
}

impl ShareLedger {
    /// Vault balance that backs outstanding shares.
    pub fn measured_balance(&self, vault_amount: u64) -> Result<u64> {
        vault_amount
            .checked_sub(self.accrued_creator_fees)
            .ok_or_else(|| error!(PoolError::VaultBalanceMismatch))
    }

    /// Records a deposit of `amount` against the vault balance observed before
    /// the transfer. Returns the shares credited to `position`.
    pub fn deposit(
        &mut self,
        position: &mut UserDeposit,
        vault_amount: u64,
        amount: u64,
    ) -> Result<u64> {
        require!(!self.paused, PoolError::PoolIsPaused);
        require!(amount > 0, PoolError::InvalidAmount);

        let total_deposits = self
            .total_deposits
            .checked_add(amount)
            .ok_or(ProgramError::ArithmeticOverflow)?;
        if self.capacity != 0 {
            require!(total_deposits <= self.capacity, PoolError::PoolAtCapacity);
        }

        // (shares added to the supply, shares credited to the depositor)
        let (minted, credited) = if self.total_shares == 0 {
            require!(
                amount >= self.min_first_deposit,
                PoolError::InsufficientFirstDeposit
            );
            let credited = amount
                .checked_sub(DEAD_SHARES)
                .ok_or(PoolError::InsufficientFirstDeposit)?;
            (amount, credited)
        } else {
            let measured = self.measured_balance(vault_amount)?;
            require!(measured > 0, PoolError::PoolDrained);
            let shares = mul_div(amount, self.total_shares, measured)?;
            require!(shares > 0, PoolError::InvalidAmount);
            (shares, shares)
        };

        let total_shares = self
            .total_shares
            .checked_add(minted)
            .ok_or(ProgramError::ArithmeticOverflow)?;
        let held = position
            .shares
            .checked_add(credited)
            .ok_or(ProgramError::ArithmeticOverflow)?;

        self.total_shares = total_shares;
        self.total_deposits = total_deposits;
        position.shares = held;
        Ok(credited)
    }

    /// Burns `shares` from `position` and returns the payout owed.
    pub fn withdraw(
        &mut self,
        position: &mut UserDeposit,
        vault_amount: u64,
        shares: u64,
        min_amount_out: u64,
    ) -> Result<u64> {
        require!(!self.paused, PoolError::PoolIsPaused);
        require!(shares > 0, PoolError::InvalidAmount);
        require!(shares <= position.shares, PoolError::InsufficientShares);

        let measured = self.measured_balance(vault_amount)?;
        let payout = mul_div(shares, measured, self.total_shares)?;
        require!(payout >= min_amount_out, PoolError::InsufficientOutput);

        let total_shares = self
            .total_shares
            .checked_sub(shares)
            .ok_or(ProgramError::ArithmeticOverflow)?;

        self.total_shares = total_shares;
        self.total_deposits = self.total_deposits.saturating_sub(payout);
        position.shares -= shares;
        Ok(payout)
    }

    /// Splits an incoming yield push between the creator and holders.
    pub fn receive_yield(&mut self, amount: u64) -> Result<YieldSplit> {
        require!(amount > 0, PoolError::InvalidAmount);
        require!(self.total_shares > 0, PoolError::NoSharesOutstanding);

        let creator_fee = mul_div(amount, self.creator_fee_bps as u64, BPS_DENOMINATOR)?;
        let holder_yield = amount - creator_fee;
        let index_delta = (holder_yield as u128)
            .checked_mul(PRECISION)
            .and_then(|v| v.checked_div(self.total_shares as u128))
            .ok_or(ProgramError::ArithmeticOverflow)?;

        let accrued = self
            .accrued_creator_fees
            .checked_add(creator_fee)
            .ok_or(ProgramError::ArithmeticOverflow)?;
        let supply_index = self
            .supply_index
            .checked_add(index_delta)
            .ok_or(ProgramError::ArithmeticOverflow)?;

        self.accrued_creator_fees = accrued;
        self.supply_index = supply_index;
        Ok(YieldSplit {
            creator_fee,
            holder_yield,
            index_delta,
        })
    }

    pub fn claim_creator_fees(&mut self, caller: &Pubkey) -> Result<u64> {
        require_keys_eq!(*caller, self.creator, PoolError::NotCreator);
        require!(self.accrued_creator_fees > 0, PoolError::NoYieldToClaim);

        let amount = self.accrued_creator_fees;
        self.accrued_creator_fees = 0;
        Ok(amount)
    }

    pub fn set_paused(&mut self, paused: bool) -> Result<()> {
        require!(self.paused != paused, PoolError::InvalidConfig);
        self.paused = paused;
        Ok(())
    }

    /// Moves the pool to a worse tier. Capacity and creator fee only ever
    /// tighten. Returns false when nothing changed.
    pub fn sync_to_tier(&mut self, tier: u8, definition: &TierDefinition) -> bool {
        if tier == NO_TIER || tier <= self.tier {
            return false;
        }

        self.tier = tier;
        self.capacity = tighter_capacity(self.capacity, definition.capacity);
        self.creator_fee_bps = self.creator_fee_bps.min(definition.creator_fee_bps);
        true
    }

    pub fn share_price(&self, vault_amount: u64) -> Result<u128> {
        if self.total_shares == 0 {
            return Ok(PRECISION);
        }
        (self.measured_balance(vault_amount)? as u128)
            .checked_mul(PRECISION)
            .and_then(|v| v.checked_div(self.total_shares as u128))
            .ok_or(ProgramError::ArithmeticOverflow.into())
    }

    /// Current redemption value of `shares`.
    pub fn value_of(&self, shares: u64, vault_amount: u64) -> Result<u64> {
        if self.total_shares == 0 || shares == 0 {
            return Ok(0);
        }
        mul_div(shares, self.measured_balance(vault_amount)?, self.total_shares)
    }

    pub fn remaining_capacity(&self) -> u64 {
        if self.capacity == 0 {
            return UNBOUNDED_CAPACITY;
        }
        self.capacity.saturating_sub(self.total_deposits)
    }
}

/// The stricter of two caps, where 0 means unlimited.
pub fn tighter_capacity(current: u64, proposed: u64) -> u64 {
    match (current, proposed) {
        (0, cap) | (cap, 0) => cap,
        (a, b) => a.min(b),
    }
}

/// Transfer out of a pool vault, signed by the pool PDA.
pub(crate) fn transfer_from_vault<'info>(
    pool: &Account<'info, ShareLedger>,
    vault: &Account<'info, TokenAccount>,
    destination: &Account<'info, TokenAccount>,
    token_program: &Program<'info, Token>,
    amount: u64,
) -> Result<()> {
    let pool_id = pool.pool_id.to_le_bytes();
    let seeds: &[&[u8]] = &[POOL_SEED, &pool_id, &[pool.bump]];
    let signer = &[seeds];

    let cpi_accounts = token::Transfer {
        from: vault.to_account_info(),
        to: destination.to_account_info(),
        authority: pool.to_account_info(),
    };
    let cpi_ctx = CpiContext::new_with_signer(token_program.to_account_info(), cpi_accounts, signer);
    token::transfer(cpi_ctx, amount)
}

/// Deposit asset tokens into a pool and receive shares
pub fn deposit(ctx: Context<Deposit>, amount: u64) -> Result<()> {
    let vault_amount = ctx.accounts.vault.amount;

    let position = &mut ctx.accounts.user_deposit;
    if position.owner == Pubkey::default() {
        position.pool = ctx.accounts.pool.key();
        position.owner = ctx.accounts.depositor.key();
        position.bump = ctx.bumps.user_deposit;
    }

    let shares = ctx
        .accounts
        .pool
        .deposit(&mut ctx.accounts.user_deposit, vault_amount, amount)?;

    let cpi_accounts = token::Transfer {
        from: ctx.accounts.depositor_token_account.to_account_info(),
        to: ctx.accounts.vault.to_account_info(),
        authority: ctx.accounts.depositor.to_account_info(),
    };
    let cpi_ctx = CpiContext::new(ctx.accounts.token_program.to_account_info(), cpi_accounts);
    token::transfer(cpi_ctx, amount)?;

    let pool = &ctx.accounts.pool;
    emit!(DepositRecorded {
        pool: pool.key(),
        depositor: ctx.accounts.depositor.key(),
        amount,
        shares,
        total_shares: pool.total_shares,
        total_deposits: pool.total_deposits,
    });

    msg!("Deposited {} into pool {}: {} shares", amount, pool.pool_id, shares);
    Ok(())
}

/// Redeem shares for their current value, reverting below `min_amount_out`
pub fn withdraw(ctx: Context<Withdraw>, shares: u64, min_amount_out: u64) -> Result<()> {
    let vault_amount = ctx.accounts.vault.amount;
    let payout = ctx.accounts.pool.withdraw(
        &mut ctx.accounts.user_deposit,
        vault_amount,
        shares,
        min_amount_out,
    )?;

    if payout > 0 {
        transfer_from_vault(
            &ctx.accounts.pool,
            &ctx.accounts.vault,
            &ctx.accounts.owner_token_account,
            &ctx.accounts.token_program,
            payout,
        )?;
    }

    let pool = &ctx.accounts.pool;
    emit!(WithdrawalRecorded {
        pool: pool.key(),
        owner: ctx.accounts.owner.key(),
        shares,
        payout,
        total_shares: pool.total_shares,
    });

    msg!("Withdrew {} shares from pool {}: payout {}", shares, pool.pool_id, payout);
    Ok(())
}

/// Push yield into a pool (approved yield sources only). Allowed while paused.
pub fn receive_yield(ctx: Context<ReceiveYield>, amount: u64) -> Result<()> {
    let split = ctx.accounts.pool.receive_yield(amount)?;

    let cpi_accounts = token::Transfer {
        from: ctx.accounts.source_token_account.to_account_info(),
        to: ctx.accounts.vault.to_account_info(),
        authority: ctx.accounts.yield_source.to_account_info(),
    };
    let cpi_ctx = CpiContext::new(ctx.accounts.token_program.to_account_info(), cpi_accounts);
    token::transfer(cpi_ctx, amount)?;

    let pool = &ctx.accounts.pool;
    emit!(YieldReceived {
        pool: pool.key(),
        source: ctx.accounts.yield_source.key(),
        amount,
        creator_fee: split.creator_fee,
        holder_yield: split.holder_yield,
        supply_index: pool.supply_index,
    });

    msg!(
        "Yield {} into pool {}: creator fee {}, holders {}",
        amount,
        pool.pool_id,
        split.creator_fee,
        split.holder_yield
    );
    Ok(())
}

/// Pay the creator their accrued fees
pub fn claim_creator_fees(ctx: Context<ClaimCreatorFees>) -> Result<()> {
    let creator = ctx.accounts.creator.key();
    let amount = ctx.accounts.pool.claim_creator_fees(&creator)?;

    transfer_from_vault(
        &ctx.accounts.pool,
        &ctx.accounts.vault,
        &ctx.accounts.creator_token_account,
        &ctx.accounts.token_program,
        amount,
    )?;

    emit!(CreatorFeesClaimed {
        pool: ctx.accounts.pool.key(),
        creator,
        amount,
    });

    msg!("Creator {} claimed {}", creator, amount);
    Ok(())
}

/// Pause or unpause a pool. `role` is the capability the caller must hold.
pub fn set_pool_paused(ctx: Context<PoolGovernance>, paused: bool, role: Role) -> Result<()> {
    let caller = ctx.accounts.authority.key();
    require_role(&ctx.accounts.registry, &caller, role)?;

    let pool_key = ctx.accounts.pool.key();
    ctx.accounts.pool.set_paused(paused)?;
    ctx.accounts.record.active = !paused;

    emit!(PoolPauseChanged {
        pool: pool_key,
        paused,
        changed_by: caller,
    });

    msg!("Pool {} paused={}", ctx.accounts.pool.pool_id, paused);
    Ok(())
}

/// Maps a missing registry role to the matching pool error.
pub fn require_role(registry: &TierRegistry, caller: &Pubkey, role: Role) -> Result<()> {
    if registry.has_role(caller, role) {
        return Ok(());
    }
    match role {
        Role::Admin => err!(PoolError::NotAdmin),
        Role::TierValidator => err!(PoolError::NotTierValidator),
        Role::YieldSource => err!(PoolError::UnauthorizedYieldSource),
        Role::Protocol => err!(PoolError::NotProtocol),
    }
}

#[derive(Accounts)]
pub struct Deposit<'info> {
    #[account(mut)]
    pub depositor: Signer<'info>,

    #[account(mut)]
    pub pool: Box<Account<'info, ShareLedger>>,

    #[account(
        init_if_needed,
        payer = depositor,
        space = UserDeposit::LEN,
        seeds = [DEPOSIT_SEED, pool.key().as_ref(), depositor.key().as_ref()],
        bump,
    )]
    pub user_deposit: Box<Account<'info, UserDeposit>>,

    #[account(
        mut,
        constraint = depositor_token_account.mint == pool.asset_mint @ PoolError::InvalidMint
    )]
    pub depositor_token_account: Box<Account<'info, TokenAccount>>,

    #[account(
        mut,
        seeds = [VAULT_SEED, pool.key().as_ref()],
        bump = pool.vault_bump,
        address = pool.vault @ PoolError::InvalidVault,
    )]
    pub vault: Box<Account<'info, TokenAccount>>,

    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct Withdraw<'info> {
    pub owner: Signer<'info>,

    #[account(mut)]
    pub pool: Box<Account<'info, ShareLedger>>,

    #[account(
        mut,
        seeds = [DEPOSIT_SEED, pool.key().as_ref(), owner.key().as_ref()],
        bump = user_deposit.bump,
    )]
    pub user_deposit: Box<Account<'info, UserDeposit>>,

    #[account(
        mut,
        constraint = owner_token_account.mint == pool.asset_mint @ PoolError::InvalidMint
    )]
    pub owner_token_account: Box<Account<'info, TokenAccount>>,

    #[account(
        mut,
        seeds = [VAULT_SEED, pool.key().as_ref()],
        bump = pool.vault_bump,
        address = pool.vault @ PoolError::InvalidVault,
    )]
    pub vault: Box<Account<'info, TokenAccount>>,

    pub token_program: Program<'info, Token>,
}

#[derive(Accounts)]
pub struct ReceiveYield<'info> {
    #[account(
        seeds = [FACTORY_SEED],
        bump = factory.bump,
        has_one = registry @ PoolError::InvalidAddress,
    )]
    pub factory: Box<Account<'info, PoolFactory>>,

    pub registry: Box<Account<'info, TierRegistry>>,

    #[account(
        constraint = registry.has_role(&yield_source.key(), Role::YieldSource)
            @ PoolError::UnauthorizedYieldSource
    )]
    pub yield_source: Signer<'info>,

    #[account(mut, has_one = factory @ PoolError::UnknownPool)]
    pub pool: Box<Account<'info, ShareLedger>>,

    #[account(
        mut,
        constraint = source_token_account.mint == pool.asset_mint @ PoolError::InvalidMint
    )]
    pub source_token_account: Box<Account<'info, TokenAccount>>,

    #[account(
        mut,
        seeds = [VAULT_SEED, pool.key().as_ref()],
        bump = pool.vault_bump,
        address = pool.vault @ PoolError::InvalidVault,
    )]
    pub vault: Box<Account<'info, TokenAccount>>,

    pub token_program: Program<'info, Token>,
}

#[derive(Accounts)]
pub struct ClaimCreatorFees<'info> {
    pub creator: Signer<'info>,

    #[account(mut)]
    pub pool: Box<Account<'info, ShareLedger>>,

    #[account(
        mut,
        constraint = creator_token_account.mint == pool.asset_mint @ PoolError::InvalidMint
    )]
    pub creator_token_account: Box<Account<'info, TokenAccount>>,

    #[account(
        mut,
        seeds = [VAULT_SEED, pool.key().as_ref()],
        bump = pool.vault_bump,
        address = pool.vault @ PoolError::InvalidVault,
    )]
    pub vault: Box<Account<'info, TokenAccount>>,

    pub token_program: Program<'info, Token>,
}

/// Privileged pool operations. The caller's role is checked by each handler.
#[derive(Accounts)]
pub struct PoolGovernance<'info> {
    pub authority: Signer<'info>,

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
}

#[event]
pub struct DepositRecorded {
    pub pool: Pubkey,
    pub depositor: Pubkey,
    pub amount: u64,
    pub shares: u64,
    pub total_shares: u64,
    pub total_deposits: u64,
}

#[event]
pub struct WithdrawalRecorded {
    pub pool: Pubkey,
    pub owner: Pubkey,
    pub shares: u64,
    pub payout: u64,
    pub total_shares: u64,
}

#[event]
pub struct YieldReceived {
    pub pool: Pubkey,
    pub source: Pubkey,
    pub amount: u64,
    pub creator_fee: u64,
    pub holder_yield: u64,
    pub supply_index: u128,
}

#[event]
pub struct CreatorFeesClaimed {
    pub pool: Pubkey,
    pub creator: Pubkey,
    pub amount: u64,
}

#[event]
pub struct PoolPauseChanged {
    pub pool: Pubkey,
    pub paused: bool,
    pub changed_by: Pubkey,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures::{ledger, position};
    use proptest::prelude::*;

    const ONE: u64 = 1_000_000_000; // one asset unit at 9 decimals

    /// Ledger plus a simulated vault balance.
    struct Harness {
        pool: ShareLedger,
        vault: u64,
    }

    impl Harness {
        fn new(capacity: u64, creator_fee_bps: u16) -> Self {
            Self { pool: ledger(2, capacity, creator_fee_bps), vault: 0 }
        }

        fn deposit(&mut self, who: &mut UserDeposit, amount: u64) -> Result<u64> {
            let shares = self.pool.deposit(who, self.vault, amount)?;
            self.vault += amount;
            Ok(shares)
        }

        fn withdraw(&mut self, who: &mut UserDeposit, shares: u64, min_out: u64) -> Result<u64> {
            let payout = self.pool.withdraw(who, self.vault, shares, min_out)?;
            self.vault -= payout;
            Ok(payout)
        }

        fn push_yield(&mut self, amount: u64) -> Result<YieldSplit> {
            let split = self.pool.receive_yield(amount)?;
            self.vault += amount;
            Ok(split)
        }
    }

    #[test]
    fn first_deposit_floor_is_exact() {
        let mut h = Harness::new(0, 0);
        let mut alice = position(&h.pool);

        assert_eq!(
            h.deposit(&mut alice, MIN_FIRST_DEPOSIT - 1).unwrap_err(),
            PoolError::InsufficientFirstDeposit.into()
        );
        assert_eq!(h.pool.total_shares, 0);
        assert_eq!(alice.shares, 0);

        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();

        // Any amount once shares exist
        let mut bob = position(&h.pool);
        assert_eq!(h.deposit(&mut bob, 1).unwrap(), 1);
    }

    #[test]
    fn first_deposit_locks_dead_shares_at_unit_price() {
        let mut h = Harness::new(0, 0);
        let mut alice = position(&h.pool);

        let shares = h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();
        assert_eq!(shares, MIN_FIRST_DEPOSIT - DEAD_SHARES);
        assert_eq!(h.pool.total_shares, MIN_FIRST_DEPOSIT);
        assert_eq!(h.pool.share_price(h.vault).unwrap(), PRECISION);
        assert_eq!(h.pool.total_deposits, MIN_FIRST_DEPOSIT);
    }

    #[test]
    fn donation_dilutes_the_next_depositor_only() {
        let mut h = Harness::new(0, 0);
        let mut alice = position(&h.pool);
        let mut bob = position(&h.pool);
        h.deposit(&mut alice, 1_000 * ONE).unwrap();

        let fair_shares = {
            let mut newcomer = position(&h.pool);
            let mut pool = h.pool.clone();
            pool.deposit(&mut newcomer, h.vault, 500 * ONE).unwrap()
        };

        // Attacker transfers straight into the vault
        let donation = 1_000 * ONE;
        h.vault += donation;
        let shares_before = h.pool.total_shares;
        let balance_before = h.vault - donation;

        let shares = h.deposit(&mut bob, 500 * ONE).unwrap();
        assert_eq!(
            shares as u128,
            (500 * ONE) as u128 * shares_before as u128 / (balance_before + donation) as u128
        );
        assert!(shares < fair_shares);
        // The attacker holds no shares, so the donation is unrecoverable
        assert_eq!(h.pool.total_shares, alice.shares + bob.shares + DEAD_SHARES);
    }

    #[test]
    fn capacity_is_enforced_before_floor() {
        let mut h = Harness::new(MIN_FIRST_DEPOSIT + 10, 0);
        let mut alice = position(&h.pool);

        assert_eq!(
            h.deposit(&mut alice, MIN_FIRST_DEPOSIT + 11).unwrap_err(),
            PoolError::PoolAtCapacity.into()
        );
        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();
        assert_eq!(h.pool.remaining_capacity(), 10);
        h.deposit(&mut alice, 10).unwrap();
        assert_eq!(h.pool.remaining_capacity(), 0);
        assert_eq!(
            h.deposit(&mut alice, 1).unwrap_err(),
            PoolError::PoolAtCapacity.into()
        );
    }

    #[test]
    fn unlimited_capacity_reports_sentinel() {
        let h = Harness::new(0, 0);
        assert_eq!(h.pool.remaining_capacity(), UNBOUNDED_CAPACITY);
    }

    #[test]
    fn zero_amounts_are_rejected() {
        let mut h = Harness::new(0, 0);
        let mut alice = position(&h.pool);
        assert_eq!(h.deposit(&mut alice, 0).unwrap_err(), PoolError::InvalidAmount.into());

        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();
        assert_eq!(
            h.withdraw(&mut alice, 0, 0).unwrap_err(),
            PoolError::InvalidAmount.into()
        );
    }

    #[test]
    fn deposit_minting_nothing_is_rejected() {
        let mut h = Harness::new(0, 0);
        let mut alice = position(&h.pool);
        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();
        // Price far above one unit per share
        h.vault += 10 * MIN_FIRST_DEPOSIT;

        let mut bob = position(&h.pool);
        assert_eq!(h.deposit(&mut bob, 1).unwrap_err(), PoolError::InvalidAmount.into());
        assert_eq!(bob.shares, 0);
    }

    #[test]
    fn withdraw_honours_slippage_bound() {
        let mut h = Harness::new(0, 0);
        let mut alice = position(&h.pool);
        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();

        let shares = alice.shares / 2;
        let quoted = h.pool.value_of(shares, h.vault).unwrap();
        let before = h.pool.clone();

        assert_eq!(
            h.withdraw(&mut alice, shares, quoted + 1).unwrap_err(),
            PoolError::InsufficientOutput.into()
        );
        assert_eq!(h.pool.total_shares, before.total_shares);

        assert_eq!(h.withdraw(&mut alice, shares, 0).unwrap(), quoted);
    }

    #[test]
    fn withdraw_more_than_held_fails() {
        let mut h = Harness::new(0, 0);
        let mut alice = position(&h.pool);
        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();

        let held = alice.shares;
        assert_eq!(
            h.withdraw(&mut alice, held + 1, 0).unwrap_err(),
            PoolError::InsufficientShares.into()
        );
    }

    #[test]
    fn full_exit_leaves_dead_shares_backed() {
        let mut h = Harness::new(0, 0);
        let mut alice = position(&h.pool);
        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();

        let held = alice.shares;
        let payout = h.withdraw(&mut alice, held, 0).unwrap();
        assert_eq!(payout, MIN_FIRST_DEPOSIT - DEAD_SHARES);
        assert_eq!(h.pool.total_shares, DEAD_SHARES);
        assert_eq!(h.vault, DEAD_SHARES);
        assert_eq!(h.pool.share_price(h.vault).unwrap(), PRECISION);
    }

    #[test]
    fn paused_pool_blocks_flows_but_accepts_yield() {
        let mut h = Harness::new(0, 0);
        let mut alice = position(&h.pool);
        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();

        h.pool.set_paused(true).unwrap();
        assert_eq!(h.pool.set_paused(true).unwrap_err(), PoolError::InvalidConfig.into());

        assert_eq!(h.deposit(&mut alice, ONE).unwrap_err(), PoolError::PoolIsPaused.into());
        assert_eq!(
            h.withdraw(&mut alice, 1, 0).unwrap_err(),
            PoolError::PoolIsPaused.into()
        );
        h.push_yield(ONE).unwrap();

        h.pool.set_paused(false).unwrap();
        h.withdraw(&mut alice, 1, 0).unwrap();
    }

    #[test]
    fn creator_fee_takes_floor_of_basis_points() {
        let mut h = Harness::new(0, 100);
        let mut alice = position(&h.pool);
        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();
        let price_before = h.pool.share_price(h.vault).unwrap();

        let split = h.push_yield(100).unwrap();
        assert_eq!(split.creator_fee, 1);
        assert_eq!(split.holder_yield, 99);
        assert_eq!(h.pool.accrued_creator_fees, 1);

        // Holders gain exactly the 99 units
        assert_eq!(h.pool.measured_balance(h.vault).unwrap(), MIN_FIRST_DEPOSIT + 99);
        assert!(h.pool.share_price(h.vault).unwrap() > price_before);
        assert_eq!(
            h.pool.supply_index,
            99 * PRECISION / MIN_FIRST_DEPOSIT as u128
        );
    }

    #[test]
    fn yield_requires_outstanding_shares() {
        let mut h = Harness::new(0, 100);
        assert_eq!(
            h.push_yield(ONE).unwrap_err(),
            PoolError::NoSharesOutstanding.into()
        );
        let mut alice = position(&h.pool);
        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();
        assert_eq!(h.push_yield(0).unwrap_err(), PoolError::InvalidAmount.into());
    }

    #[test]
    fn unclaimed_fees_do_not_back_shares() {
        let mut h = Harness::new(0, 1_000);
        let mut alice = position(&h.pool);
        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();
        h.push_yield(10 * ONE).unwrap();

        let held = alice.shares;
        let payout = h.withdraw(&mut alice, held, 0).unwrap();
        assert_eq!(h.vault, DEAD_SHARES + ONE + (9 * ONE * DEAD_SHARES / MIN_FIRST_DEPOSIT));
        assert!(payout < MIN_FIRST_DEPOSIT - DEAD_SHARES + 9 * ONE);

        let creator = h.pool.creator;
        let claimed = h.pool.claim_creator_fees(&creator).unwrap();
        assert_eq!(claimed, ONE);
        h.vault -= claimed;
        assert_eq!(h.pool.accrued_creator_fees, 0);
    }

    #[test]
    fn only_creator_claims_and_only_when_accrued() {
        let mut h = Harness::new(0, 100);
        let creator = h.pool.creator;
        assert_eq!(
            h.pool.claim_creator_fees(&creator).unwrap_err(),
            PoolError::NoYieldToClaim.into()
        );

        let mut alice = position(&h.pool);
        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();
        h.push_yield(10_000).unwrap();

        assert_eq!(
            h.pool.claim_creator_fees(&Pubkey::new_unique()).unwrap_err(),
            PoolError::NotCreator.into()
        );
        assert_eq!(h.pool.claim_creator_fees(&creator).unwrap(), 100);
    }

    #[test]
    fn drained_pool_rejects_deposits() {
        let mut h = Harness::new(0, 0);
        let mut alice = position(&h.pool);
        h.deposit(&mut alice, MIN_FIRST_DEPOSIT).unwrap();
        h.vault = 0;

        let mut bob = position(&h.pool);
        assert_eq!(
            h.deposit(&mut bob, MIN_FIRST_DEPOSIT).unwrap_err(),
            PoolError::PoolDrained.into()
        );
        assert_eq!(h.pool.value_of(alice.shares, h.vault).unwrap(), 0);
    }

    #[test]
    fn sync_only_moves_to_worse_tiers() {
        let mut pool = ledger(2, 5_000, 200);
        let better = TierDefinition { capacity: 0, creation_fee: 0, creator_fee_bps: 500 };
        assert!(!pool.sync_to_tier(1, &better));
        assert!(!pool.sync_to_tier(2, &better));
        assert!(!pool.sync_to_tier(NO_TIER, &better));
        assert_eq!((pool.tier, pool.capacity, pool.creator_fee_bps), (2, 5_000, 200));

        let worse = TierDefinition { capacity: 1_000, creation_fee: 0, creator_fee_bps: 300 };
        assert!(pool.sync_to_tier(3, &worse));
        assert_eq!((pool.tier, pool.capacity, pool.creator_fee_bps), (3, 1_000, 200));
    }

    #[test]
    fn missing_roles_map_to_pool_errors() {
        let admin = Pubkey::new_unique();
        let outsider = Pubkey::new_unique();
        let registry = TierRegistry::new(admin, 0, 255);

        let cases = [
            (Role::Admin, PoolError::NotAdmin),
            (Role::TierValidator, PoolError::NotTierValidator),
            (Role::YieldSource, PoolError::UnauthorizedYieldSource),
            (Role::Protocol, PoolError::NotProtocol),
        ];
        for (role, expected) in cases {
            assert_eq!(
                require_role(&registry, &outsider, role).unwrap_err(),
                expected.into()
            );
        }
        require_role(&registry, &admin, Role::Admin).unwrap();
    }

    #[test]
    fn granted_roles_pass_and_do_not_leak() {
        let admin = Pubkey::new_unique();
        let mut registry = TierRegistry::new(admin, 0, 255);
        let roles = [Role::Admin, Role::TierValidator, Role::YieldSource, Role::Protocol];

        for role in roles {
            let holder = Pubkey::new_unique();
            registry.grant_role(holder, role).unwrap();
            require_role(&registry, &holder, role).unwrap();
            for other in roles.into_iter().filter(|r| *r != role) {
                assert!(require_role(&registry, &holder, other).is_err());
            }
        }

        // The registry admin holds no operational roles by default
        assert_eq!(
            require_role(&registry, &admin, Role::Protocol).unwrap_err(),
            PoolError::NotProtocol.into()
        );
        assert_eq!(
            require_role(&registry, &admin, Role::TierValidator).unwrap_err(),
            PoolError::NotTierValidator.into()
        );
    }

    #[test]
    fn revoked_role_is_rejected_again() {
        let admin = Pubkey::new_unique();
        let operator = Pubkey::new_unique();
        let mut registry = TierRegistry::new(admin, 0, 255);

        registry.grant_role(operator, Role::Admin).unwrap();
        require_role(&registry, &operator, Role::Admin).unwrap();
        registry.revoke_role(&operator, Role::Admin).unwrap();
        assert_eq!(
            require_role(&registry, &operator, Role::Admin).unwrap_err(),
            PoolError::NotAdmin.into()
        );
    }

    #[test]
    fn tighter_capacity_treats_zero_as_unlimited() {
        assert_eq!(tighter_capacity(0, 0), 0);
        assert_eq!(tighter_capacity(0, 7), 7);
        assert_eq!(tighter_capacity(7, 0), 7);
        assert_eq!(tighter_capacity(7, 3), 3);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Deposit(usize, u64),
        Withdraw(usize, u64),
        Yield(u64),
        Donate(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3, 1u64..5_000 * ONE).prop_map(|(u, a)| Op::Deposit(u, a)),
            (0usize..3, 1u64..5_000 * ONE).prop_map(|(u, s)| Op::Withdraw(u, s)),
            (1u64..100 * ONE).prop_map(Op::Yield),
            (1u64..100 * ONE).prop_map(Op::Donate),
        ]
    }

    proptest! {
        #[test]
        fn shares_are_conserved(
            fee_bps in 0u16..=10_000,
            ops in proptest::collection::vec(op(), 1..40),
        ) {
            let mut h = Harness::new(0, fee_bps);
            let mut users: Vec<UserDeposit> = (0..3).map(|_| position(&h.pool)).collect();

            for op in ops {
                let snapshot = (h.pool.clone(), h.vault);
                let result = match op {
                    Op::Deposit(u, a) => h.deposit(&mut users[u], a).map(|_| ()),
                    Op::Withdraw(u, s) => {
                        let held = users[u].shares;
                        h.withdraw(&mut users[u], s.min(held.max(1)), 0).map(|_| ())
                    }
                    Op::Yield(a) => h.push_yield(a).map(|_| ()),
                    Op::Donate(a) => {
                        h.vault += a;
                        Ok(())
                    }
                };
                if result.is_err() {
                    prop_assert_eq!(h.pool.total_shares, snapshot.0.total_shares);
                    prop_assert_eq!(h.pool.supply_index, snapshot.0.supply_index);
                    prop_assert_eq!(h.vault, snapshot.1);
                }

                let held: u64 = users.iter().map(|u| u.shares).sum();
                if h.pool.total_shares > 0 {
                    prop_assert_eq!(held + DEAD_SHARES, h.pool.total_shares);
                }
                prop_assert!(h.pool.measured_balance(h.vault).is_ok());
            }
        }
    }
}
