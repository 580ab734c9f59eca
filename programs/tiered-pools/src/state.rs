use anchor_lang::prelude::*;

// Share math
pub const PRECISION: u128 = 1_000_000_000_000_000_000; // 1e18 fixed point for share price and index
pub const BPS_DENOMINATOR: u64 = 10_000;
pub const ASSET_DECIMALS: u8 = 9;
pub const MIN_FIRST_DEPOSIT: u64 = 1_000_000_000_000; // $1,000 at 9 decimals
pub const DEAD_SHARES: u64 = 1_000_000_000; // never assigned to an owner
pub const EMERGENCY_DELAY: i64 = 3 * 24 * 60 * 60; // 3 days

// Capacity reporting
pub const UNBOUNDED_CAPACITY: u64 = u64::MAX;

// Table bounds
pub const MAX_POOL_NAME_LEN: usize = 64;
pub const MAX_EMERGENCY_PROPOSALS: usize = 4;
pub const MAX_PAGE_LEN: usize = 24;

// PDA seeds
pub const FACTORY_SEED: &[u8] = b"pool_factory";
pub const POOL_SEED: &[u8] = b"pool";
pub const VAULT_SEED: &[u8] = b"vault";
pub const DEPOSIT_SEED: &[u8] = b"deposit";
pub const RECORD_SEED: &[u8] = b"record";
pub const NAME_SEED: &[u8] = b"name";
pub const CREATOR_POOLS_SEED: &[u8] = b"creator_pools";

/// Defaults every new ledger is constructed from.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerTemplate {
    pub version: u32,
    pub min_first_deposit: u64,
    pub emergency_delay: i64,
}

impl LedgerTemplate {
    pub const LEN: usize = 4 + 8 + 8;

    pub fn validate(&self) -> Result<()> {
        require!(
            self.min_first_deposit > DEAD_SHARES,
            PoolError::InvalidConfig
        );
        require!(
            self.emergency_delay >= EMERGENCY_DELAY,
            PoolError::InvalidConfig
        );
        Ok(())
    }
}

impl Default for LedgerTemplate {
    fn default() -> Self {
        Self {
            version: 1,
            min_first_deposit: MIN_FIRST_DEPOSIT,
            emergency_delay: EMERGENCY_DELAY,
        }
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalStatus {
    Pending,
    Cancelled,
    Executed,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmergencyProposal {
    pub id: [u8; 32],
    pub proposer: Pubkey,
    pub recipient: Pubkey,
    pub proposed_at: i64,
    pub status: ProposalStatus,
}

impl EmergencyProposal {
    pub const LEN: usize = 32 + // id
        32 + // proposer
        32 + // recipient
        8 +  // proposed_at
        1; // status
}

/// Construction parameters for a fresh ledger.
pub struct LedgerParams {
    pub factory: Pubkey,
    pub pool_id: u64,
    pub name: String,
    pub creator: Pubkey,
    pub asset_mint: Pubkey,
    pub vault: Pubkey,
    pub tier: u8,
    pub capacity: u64,
    pub creator_fee_bps: u16,
    pub template: LedgerTemplate,
    pub created_at: i64,
    pub bump: u8,
    pub vault_bump: u8,
}

/// Per-pool share accounting. Value is custodied in `vault`; the measured
/// balance (vault amount less unclaimed creator fees) backs `total_shares`.
#[account]
pub struct ShareLedger {
    pub factory: Pubkey,
    pub pool_id: u64,
    pub name: String,
    pub creator: Pubkey,
    pub asset_mint: Pubkey,
    pub vault: Pubkey,
    pub tier: u8,
    pub capacity: u64, // 0 = unlimited
    pub creator_fee_bps: u16,
    pub total_deposits: u64, // reporting only, never used for share math
    pub total_shares: u64,
    pub supply_index: u128, // cumulative holder yield per share, scaled by PRECISION
    pub accrued_creator_fees: u64,
    pub min_first_deposit: u64,
    pub emergency_delay: i64,
    pub paused: bool,
    pub emergency_proposals: Vec<EmergencyProposal>,
    pub created_at: i64,
    pub bump: u8,
    pub vault_bump: u8,
}

impl ShareLedger {
    pub const LEN: usize = 8 + // discriminator
        32 + // factory
        8 +  // pool_id
        4 + MAX_POOL_NAME_LEN + // name
        32 + // creator
        32 + // asset_mint
        32 + // vault
        1 +  // tier
        8 +  // capacity
        2 +  // creator_fee_bps
        8 +  // total_deposits
        8 +  // total_shares
        16 + // supply_index
        8 +  // accrued_creator_fees
        8 +  // min_first_deposit
        8 +  // emergency_delay
        1 +  // paused
        4 + EmergencyProposal::LEN * MAX_EMERGENCY_PROPOSALS + // emergency_proposals
        8 +  // created_at
        1 +  // bump
        1; // vault_bump

    pub fn new(params: LedgerParams) -> Self {
        Self {
            factory: params.factory,
            pool_id: params.pool_id,
            name: params.name,
            creator: params.creator,
            asset_mint: params.asset_mint,
            vault: params.vault,
            tier: params.tier,
            capacity: params.capacity,
            creator_fee_bps: params.creator_fee_bps,
            total_deposits: 0,
            total_shares: 0,
            supply_index: 0,
            accrued_creator_fees: 0,
            min_first_deposit: params.template.min_first_deposit,
            emergency_delay: params.template.emergency_delay,
            paused: false,
            emergency_proposals: Vec::new(),
            created_at: params.created_at,
            bump: params.bump,
            vault_bump: params.vault_bump,
        }
    }
}

#[account]
pub struct UserDeposit {
    pub pool: Pubkey,
    pub owner: Pubkey,
    pub shares: u64,
    pub bump: u8,
}

impl UserDeposit {
    pub const LEN: usize = 8 + // discriminator
        32 + // pool
        32 + // owner
        8 +  // shares
        1; // bump
}

/// Directory entry for one pool, stored at `["record", pool]`.
#[account]
#[derive(Debug, PartialEq, Eq)]
pub struct PoolRecord {
    pub pool: Pubkey,
    pub pool_id: u64,
    pub name: String,
    pub creator: Pubkey,
    pub tier: u8,
    pub active: bool,
    pub bump: u8,
}

impl PoolRecord {
    pub const LEN: usize = 8 + // discriminator
        32 + // pool
        8 +  // pool_id
        4 + MAX_POOL_NAME_LEN + // name
        32 + // creator
        1 +  // tier
        1 +  // active
        1; // bump
}

/// Marks a pool name as taken. Stored at `["name", sha256(name)]`.
#[account]
pub struct PoolNameClaim {
    pub pool: Pubkey,
    pub bump: u8,
}

impl PoolNameClaim {
    pub const LEN: usize = 8 + // discriminator
        32 + // pool
        1; // bump
}

/// Number of pools a creator owns, stored at `["creator_pools", creator]`.
#[account]
pub struct CreatorPools {
    pub creator: Pubkey,
    pub pool_count: u32,
    pub bump: u8,
}

impl CreatorPools {
    pub const LEN: usize = 8 + // discriminator
        32 + // creator
        4 +  // pool_count
        1; // bump
}

/// Factory singleton: registry binding, treasury, template and pool counter.
#[account]
pub struct PoolFactory {
    pub registry: Pubkey,
    pub asset_mint: Pubkey,
    pub treasury: Pubkey,
    pub template: LedgerTemplate,
    pub pool_count: u64,
    pub created_at: i64,
    pub bump: u8,
}

impl PoolFactory {
    pub const LEN: usize = 8 + // discriminator
        32 + // registry
        32 + // asset_mint
        32 + // treasury
        LedgerTemplate::LEN + // template
        8 +  // pool_count
        8 +  // created_at
        1; // bump
}

/// Runs `f` against a scratch copy of `target` and writes it back only on success.
pub fn staged<T: Clone, R>(target: &mut T, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
    let mut scratch = target.clone();
    let out = f(&mut scratch)?;
    *target = scratch;
    Ok(out)
}

/// `a * b / c` with a u128 intermediate, rounding down.
pub fn mul_div(a: u64, b: u64, c: u64) -> Result<u64> {
    let value = (a as u128)
        .checked_mul(b as u128)
        .and_then(|v| v.checked_div(c as u128))
        .ok_or(ProgramError::ArithmeticOverflow)?;
    u64::try_from(value).map_err(|_| ProgramError::ArithmeticOverflow.into())
}

#[error_code]
pub enum PoolError {
    #[msg("Invalid address")]
    InvalidAddress,
    #[msg("Invalid amount - must be greater than zero")]
    InvalidAmount,
    #[msg("Tier is outside the defined range")]
    InvalidTier,
    #[msg("Pool name must not be empty")]
    InvalidName,
    #[msg("Pool name exceeds 64 bytes")]
    NameTooLong,
    #[msg("First deposit is below the minimum")]
    InsufficientFirstDeposit,
    #[msg("Deposit would exceed pool capacity")]
    PoolAtCapacity,
    #[msg("Insufficient shares")]
    InsufficientShares,
    #[msg("Payout is below the requested minimum")]
    InsufficientOutput,
    #[msg("Pool name already taken")]
    PoolNameTaken,
    #[msg("Creator tier does not allow the requested tier")]
    InsufficientTier,
    #[msg("Caller is not the pool creator")]
    NotCreator,
    #[msg("Caller lacks the protocol role")]
    NotProtocol,
    #[msg("Caller lacks the admin role")]
    NotAdmin,
    #[msg("Caller lacks the tier validator role")]
    NotTierValidator,
    #[msg("Caller is not an approved yield source")]
    UnauthorizedYieldSource,
    #[msg("Pool is paused")]
    PoolIsPaused,
    #[msg("Emergency notice period has not elapsed")]
    EmergencyTimelockNotMet,
    #[msg("Emergency withdrawal was not proposed")]
    EmergencyNotProposed,
    #[msg("Emergency withdrawal already executed")]
    EmergencyAlreadyExecuted,
    #[msg("Emergency withdrawal already proposed")]
    EmergencyAlreadyProposed,
    #[msg("Too many emergency proposals")]
    ProposalLimitReached,
    #[msg("No creator fees to claim")]
    NoYieldToClaim,
    #[msg("No shares outstanding")]
    NoSharesOutstanding,
    #[msg("Pool balance has been drained")]
    PoolDrained,
    #[msg("Every pool of the creator must be passed exactly once")]
    IncompletePoolSet,
    #[msg("Pool is not registered with this factory")]
    UnknownPool,
    #[msg("Vault balance mismatch - potential manipulation detected")]
    VaultBalanceMismatch,
    #[msg("Invalid vault account")]
    InvalidVault,
    #[msg("Invalid mint account")]
    InvalidMint,
    #[msg("Invalid treasury account")]
    InvalidTreasury,
    #[msg("Invalid configuration")]
    InvalidConfig,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn ledger(tier: u8, capacity: u64, creator_fee_bps: u16) -> ShareLedger {
        ShareLedger::new(LedgerParams {
            factory: Pubkey::new_unique(),
            pool_id: 0,
            name: "alpha".to_string(),
            creator: Pubkey::new_unique(),
            asset_mint: Pubkey::new_unique(),
            vault: Pubkey::new_unique(),
            tier,
            capacity,
            creator_fee_bps,
            template: LedgerTemplate::default(),
            created_at: 1_700_000_000,
            bump: 254,
            vault_bump: 253,
        })
    }

    pub fn position(ledger: &ShareLedger) -> UserDeposit {
        UserDeposit {
            pool: ledger.factory,
            owner: Pubkey::new_unique(),
            shares: 0,
            bump: 255,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounts_fit_single_allocation() {
        assert!(PoolFactory::LEN <= 10_240);
        assert!(ShareLedger::LEN <= 10_240);
    }

    #[test]
    fn default_template_is_valid() {
        LedgerTemplate::default().validate().unwrap();
    }

    #[test]
    fn template_cannot_shorten_notice_or_undercut_dead_shares() {
        let short = LedgerTemplate { emergency_delay: EMERGENCY_DELAY - 1, ..Default::default() };
        assert_eq!(short.validate().unwrap_err(), PoolError::InvalidConfig.into());

        let tiny = LedgerTemplate { min_first_deposit: DEAD_SHARES, ..Default::default() };
        assert_eq!(tiny.validate().unwrap_err(), PoolError::InvalidConfig.into());
    }

    #[test]
    fn staged_discards_scratch_on_error() {
        let mut value = vec![1u64, 2, 3];
        let result: Result<()> = staged(&mut value, |v| {
            v.push(4);
            err!(PoolError::InvalidAmount)
        });
        assert!(result.is_err());
        assert_eq!(value, vec![1, 2, 3]);

        staged(&mut value, |v| {
            v.push(4);
            Ok(())
        })
        .unwrap();
        assert_eq!(value, vec![1, 2, 3, 4]);
    }

    #[test]
    fn mul_div_rounds_down_and_rejects_overflow() {
        assert_eq!(mul_div(10, 3, 4).unwrap(), 7);
        assert_eq!(mul_div(u64::MAX, 2, 2).unwrap(), u64::MAX);
        assert!(mul_div(u64::MAX, 2, 1).is_err());
        assert!(mul_div(1, 1, 0).is_err());
    }
}
