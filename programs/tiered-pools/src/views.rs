use anchor_lang::prelude::*;
use anchor_spl::token::TokenAccount;
use tier_registry::state::{assigned_tier, CreatorTier, TierRegistry, TIER_SEED};

use crate::state::*;

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct PoolInfo {
    pub total_deposits: u64,
    pub total_shares: u64,
    pub supply_index: u128,
    pub accrued_creator_fees: u64,
    pub is_paused: bool,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct PoolDetails {
    pub name: String,
    pub creator: Pubkey,
    pub tier: u8,
    pub capacity: u64,
    pub creator_fee_bps: u16,
    pub is_paused: bool,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct DepositView {
    pub shares: u64,
    pub value: u64,
}

impl ShareLedger {
    pub fn pool_info(&self) -> PoolInfo {
        PoolInfo {
            total_deposits: self.total_deposits,
            total_shares: self.total_shares,
            supply_index: self.supply_index,
            accrued_creator_fees: self.accrued_creator_fees,
            is_paused: self.paused,
        }
    }

    pub fn pool_details(&self) -> PoolDetails {
        PoolDetails {
            name: self.name.clone(),
            creator: self.creator,
            tier: self.tier,
            capacity: self.capacity,
            creator_fee_bps: self.creator_fee_bps,
            is_paused: self.paused,
        }
    }
}

impl<'info> PoolView<'info> {
    /// Shares held by `owner`; a missing position reads as zero.
    fn held_shares(&self, owner: &Pubkey) -> Result<u64> {
        let Some(position) = &self.user_deposit else {
            return Ok(0);
        };
        require_keys_eq!(position.pool, self.pool.key(), PoolError::InvalidAddress);
        require_keys_eq!(position.owner, *owner, PoolError::InvalidAddress);
        Ok(position.shares)
    }
}

pub fn get_pool_info(ctx: Context<PoolView>) -> Result<PoolInfo> {
    Ok(ctx.accounts.pool.pool_info())
}

pub fn get_pool_details(ctx: Context<PoolView>) -> Result<PoolDetails> {
    Ok(ctx.accounts.pool.pool_details())
}

pub fn share_price(ctx: Context<PoolView>) -> Result<u128> {
    ctx.accounts.pool.share_price(ctx.accounts.vault.amount)
}

pub fn remaining_capacity(ctx: Context<PoolView>) -> Result<u64> {
    Ok(ctx.accounts.pool.remaining_capacity())
}

/// Current redemption value of `owner`'s shares
pub fn balance_of(ctx: Context<PoolView>, owner: Pubkey) -> Result<u64> {
    let shares = ctx.accounts.held_shares(&owner)?;
    ctx.accounts.pool.value_of(shares, ctx.accounts.vault.amount)
}

pub fn get_user_deposit(ctx: Context<PoolView>, owner: Pubkey) -> Result<DepositView> {
    let shares = ctx.accounts.held_shares(&owner)?;
    Ok(DepositView {
        shares,
        value: ctx.accounts.pool.value_of(shares, ctx.accounts.vault.amount)?,
    })
}

pub fn pending_creator_fees(ctx: Context<PoolView>) -> Result<u64> {
    Ok(ctx.accounts.pool.accrued_creator_fees)
}

/// Address of the pool created with `pool_id`.
pub fn pool_address(pool_id: u64) -> Pubkey {
    Pubkey::find_program_address(&[POOL_SEED, &pool_id.to_le_bytes()], &crate::ID).0
}

/// Keys of records matching `filter`, skipping the first `offset` matches.
pub fn page<'a>(
    records: impl IntoIterator<Item = &'a PoolRecord>,
    offset: u32,
    filter: impl Fn(&PoolRecord) -> bool,
) -> Vec<Pubkey> {
    records
        .into_iter()
        .filter(|r| filter(r))
        .skip(offset as usize)
        .take(MAX_PAGE_LEN)
        .map(|r| r.pool)
        .collect()
}

/// Loads the directory records passed as remaining accounts.
fn load_records<'info>(
    accounts: &'info [AccountInfo<'info>],
) -> Result<Vec<Account<'info, PoolRecord>>> {
    accounts.iter().map(Account::try_from).collect()
}

pub fn get_pool_record(ctx: Context<RecordView>, _pool: Pubkey) -> Result<PoolRecord> {
    Ok((*ctx.accounts.record).clone())
}

/// Pool keys by id, derived from the factory counter
pub fn get_all_pools(ctx: Context<FactoryView>, offset: u32) -> Result<Vec<Pubkey>> {
    Ok((offset as u64..ctx.accounts.factory.pool_count)
        .take(MAX_PAGE_LEN)
        .map(pool_address)
        .collect())
}

/// Active pools among the records passed as remaining accounts
pub fn get_active_pools<'info>(
    ctx: Context<'_, '_, 'info, 'info, FactoryView<'info>>,
    offset: u32,
) -> Result<Vec<Pubkey>> {
    let records = load_records(ctx.remaining_accounts)?;
    Ok(page(records.iter().map(|r| &**r), offset, |r| r.active))
}

/// Pools of `creator` among the records passed as remaining accounts
pub fn get_creator_pools<'info>(
    ctx: Context<'_, '_, 'info, 'info, FactoryView<'info>>,
    creator: Pubkey,
    offset: u32,
) -> Result<Vec<Pubkey>> {
    let records = load_records(ctx.remaining_accounts)?;
    Ok(page(records.iter().map(|r| &**r), offset, |r| r.creator == creator))
}

pub fn can_create_pool(ctx: Context<CreatorTierView>, _creator: Pubkey, tier: u8) -> Result<bool> {
    let assigned = assigned_tier(ctx.accounts.creator_tier.as_deref());
    Ok(ctx.accounts.registry.can_create_pool(assigned, tier))
}

pub fn get_creation_fee(ctx: Context<FactoryView>, tier: u8) -> Result<u64> {
    ctx.accounts
        .registry
        .creation_fee(tier)
        .map_err(|_| error!(PoolError::InvalidTier))
}

#[derive(Accounts)]
pub struct PoolView<'info> {
    pub pool: Box<Account<'info, ShareLedger>>,

    #[account(address = pool.vault @ PoolError::InvalidVault)]
    pub vault: Box<Account<'info, TokenAccount>>,

    pub user_deposit: Option<Account<'info, UserDeposit>>,
}

#[derive(Accounts)]
pub struct FactoryView<'info> {
    #[account(
        seeds = [FACTORY_SEED],
        bump = factory.bump,
        has_one = registry @ PoolError::InvalidAddress,
    )]
    pub factory: Box<Account<'info, PoolFactory>>,

    pub registry: Box<Account<'info, TierRegistry>>,
}

#[derive(Accounts)]
#[instruction(pool: Pubkey)]
pub struct RecordView<'info> {
    #[account(seeds = [RECORD_SEED, pool.as_ref()], bump = record.bump)]
    pub record: Account<'info, PoolRecord>,
}

#[derive(Accounts)]
#[instruction(creator: Pubkey)]
pub struct CreatorTierView<'info> {
    pub registry: Box<Account<'info, TierRegistry>>,

    #[account(
        seeds = [TIER_SEED, creator.as_ref()],
        bump = creator_tier.bump,
        seeds::program = tier_registry::ID,
    )]
    pub creator_tier: Option<Account<'info, CreatorTier>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures::{ledger, position};

    #[test]
    fn info_and_details_mirror_the_ledger() {
        let mut pool = ledger(2, 50_000 * 1_000_000_000, 150);
        let mut holder = position(&pool);
        pool.deposit(&mut holder, 0, MIN_FIRST_DEPOSIT).unwrap();
        pool.receive_yield(10_000).unwrap();
        pool.set_paused(true).unwrap();

        let info = pool.pool_info();
        assert_eq!(info.total_deposits, MIN_FIRST_DEPOSIT);
        assert_eq!(info.total_shares, MIN_FIRST_DEPOSIT);
        assert_eq!(info.accrued_creator_fees, 150);
        assert_eq!(info.supply_index, pool.supply_index);
        assert!(info.is_paused);

        let details = pool.pool_details();
        assert_eq!(details.name, "alpha");
        assert_eq!(details.creator, pool.creator);
        assert_eq!(details.tier, 2);
        assert_eq!(details.creator_fee_bps, 150);
        assert!(details.is_paused);
    }

    fn record(creator: Pubkey, active: bool) -> PoolRecord {
        PoolRecord {
            pool: Pubkey::new_unique(),
            pool_id: 0,
            name: "alpha".to_string(),
            creator,
            tier: 1,
            active,
            bump: 255,
        }
    }

    #[test]
    fn pages_filter_and_cap() {
        let creator = Pubkey::new_unique();
        let records: Vec<PoolRecord> = (0..40)
            .map(|i| {
                let owner = if i % 2 == 0 { creator } else { Pubkey::new_unique() };
                record(owner, i % 4 != 0)
            })
            .collect();

        let all = page(&records, 0, |_| true);
        assert_eq!(all.len(), MAX_PAGE_LEN);
        assert_eq!(all[0], records[0].pool);
        assert_eq!(page(&records, MAX_PAGE_LEN as u32, |_| true).len(), 40 - MAX_PAGE_LEN);

        assert_eq!(page(&records, 0, |r| r.creator == creator).len(), 20);
        assert_eq!(page(&records, 0, |r| r.active).len(), 24);
        assert_eq!(page(&records, 24, |r| r.active).len(), 6);
        assert!(page(&records, 100, |_| true).is_empty());
    }

    #[test]
    fn pool_addresses_follow_creation_seeds() {
        let (expected, _) = Pubkey::find_program_address(&[POOL_SEED, &7u64.to_le_bytes()], &crate::ID);
        assert_eq!(pool_address(7), expected);
        assert_ne!(pool_address(7), pool_address(8));
    }

    #[test]
    fn page_results_fit_return_data() {
        // Vec<Pubkey> page: length prefix plus keys, under the 1 KiB return data limit
        assert!(4 + 32 * MAX_PAGE_LEN <= 1024);
        assert!(PoolRecord::LEN <= 1024);
    }
}
