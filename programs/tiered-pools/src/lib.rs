use anchor_lang::prelude::*;
use tier_registry::state::Role;

pub mod emergency;
pub mod factory;
pub mod ledger;
pub mod state;
pub mod views;

use emergency::*;
use factory::*;
use ledger::*;
use state::*;
use views::*;

declare_id!("DRX7MoQ3zZkfNmYsaEZ3881ZDqrDQ81XTB36KvVNVmmU");

#[program]
pub mod tiered_pools {
    use super::*;

    // ---- Factory ----

    /// Create the pool factory (registry admin only)
    pub fn initialize_factory(ctx: Context<InitializeFactory>) -> Result<()> {
        factory::initialize_factory(ctx)
    }

    /// Create a pool at `requested_tier`; the creator's assigned tier must be
    /// this tier or better
    pub fn create_pool(ctx: Context<CreatePool>, name: String, requested_tier: u8) -> Result<Pubkey> {
        factory::create_pool(ctx, name, requested_tier)
    }

    pub fn sync_pool_to_tier(ctx: Context<SyncPool>) -> Result<()> {
        factory::sync_pool_to_tier(ctx)
    }

    /// Every pool of `creator` is passed as a writable (pool, record) pair of
    /// remaining accounts
    pub fn sync_pools_to_tier<'info>(
        ctx: Context<'_, '_, 'info, 'info, SyncPools<'info>>,
        creator: Pubkey,
    ) -> Result<()> {
        factory::sync_pools_to_tier(ctx, creator)
    }

    /// Admin pause; also marks the pool's directory record inactive
    pub fn pause_pool(ctx: Context<PoolGovernance>) -> Result<()> {
        ledger::set_pool_paused(ctx, true, Role::Admin)
    }

    pub fn unpause_pool(ctx: Context<PoolGovernance>) -> Result<()> {
        ledger::set_pool_paused(ctx, false, Role::Admin)
    }

    pub fn update_pool_cap(ctx: Context<PoolGovernance>, capacity: u64) -> Result<()> {
        factory::update_pool_cap(ctx, capacity)
    }

    pub fn set_pool_name(ctx: Context<SetPoolName>, name: String) -> Result<()> {
        factory::set_pool_name(ctx, name)
    }

    /// Forwarded to the tier registry
    pub fn set_tier_config(
        ctx: Context<SetTierConfig>,
        tier: u8,
        capacity: u64,
        creation_fee: u64,
        creator_fee_bps: u16,
    ) -> Result<()> {
        factory::set_tier_config(ctx, tier, capacity, creation_fee, creator_fee_bps)
    }

    pub fn set_pool_template(
        ctx: Context<FactoryAdmin>,
        min_first_deposit: u64,
        emergency_delay: i64,
    ) -> Result<()> {
        factory::set_pool_template(ctx, min_first_deposit, emergency_delay)
    }

    pub fn set_treasury(ctx: Context<SetTreasury>) -> Result<()> {
        factory::set_treasury(ctx)
    }

    // ---- Share ledger ----

    pub fn deposit(ctx: Context<Deposit>, amount: u64) -> Result<()> {
        ledger::deposit(ctx, amount)
    }

    pub fn withdraw(ctx: Context<Withdraw>, shares: u64, min_amount_out: u64) -> Result<()> {
        ledger::withdraw(ctx, shares, min_amount_out)
    }

    pub fn receive_yield(ctx: Context<ReceiveYield>, amount: u64) -> Result<()> {
        ledger::receive_yield(ctx, amount)
    }

    pub fn claim_creator_fees(ctx: Context<ClaimCreatorFees>) -> Result<()> {
        ledger::claim_creator_fees(ctx)
    }

    /// Protocol-role pause
    pub fn pause(ctx: Context<PoolGovernance>) -> Result<()> {
        ledger::set_pool_paused(ctx, true, Role::Protocol)
    }

    pub fn unpause(ctx: Context<PoolGovernance>) -> Result<()> {
        ledger::set_pool_paused(ctx, false, Role::Protocol)
    }

    // ---- Emergency recovery ----

    pub fn propose_emergency_withdraw(
        ctx: Context<PoolGovernance>,
        recipient: Pubkey,
    ) -> Result<[u8; 32]> {
        emergency::propose_emergency_withdraw(ctx, recipient)
    }

    pub fn execute_emergency_withdraw(ctx: Context<ExecuteEmergency>, id: [u8; 32]) -> Result<()> {
        emergency::execute_emergency_withdraw(ctx, id)
    }

    pub fn cancel_emergency_withdraw(ctx: Context<PoolGovernance>, id: [u8; 32]) -> Result<()> {
        emergency::cancel_emergency_withdraw(ctx, id)
    }

    // ---- Views (return data) ----

    pub fn get_pool_info(ctx: Context<PoolView>) -> Result<PoolInfo> {
        views::get_pool_info(ctx)
    }

    pub fn get_pool_details(ctx: Context<PoolView>) -> Result<PoolDetails> {
        views::get_pool_details(ctx)
    }

    pub fn share_price(ctx: Context<PoolView>) -> Result<u128> {
        views::share_price(ctx)
    }

    pub fn remaining_capacity(ctx: Context<PoolView>) -> Result<u64> {
        views::remaining_capacity(ctx)
    }

    pub fn balance_of(ctx: Context<PoolView>, owner: Pubkey) -> Result<u64> {
        views::balance_of(ctx, owner)
    }

    pub fn get_user_deposit(ctx: Context<PoolView>, owner: Pubkey) -> Result<DepositView> {
        views::get_user_deposit(ctx, owner)
    }

    pub fn pending_creator_fees(ctx: Context<PoolView>) -> Result<u64> {
        views::pending_creator_fees(ctx)
    }

    pub fn get_pool_record(ctx: Context<RecordView>, pool: Pubkey) -> Result<PoolRecord> {
        views::get_pool_record(ctx, pool)
    }

    pub fn get_all_pools(ctx: Context<FactoryView>, offset: u32) -> Result<Vec<Pubkey>> {
        views::get_all_pools(ctx, offset)
    }

    /// Filters the pool records passed as remaining accounts
    pub fn get_active_pools<'info>(
        ctx: Context<'_, '_, 'info, 'info, FactoryView<'info>>,
        offset: u32,
    ) -> Result<Vec<Pubkey>> {
        views::get_active_pools(ctx, offset)
    }

    /// Filters the pool records passed as remaining accounts
    pub fn get_creator_pools<'info>(
        ctx: Context<'_, '_, 'info, 'info, FactoryView<'info>>,
        creator: Pubkey,
        offset: u32,
    ) -> Result<Vec<Pubkey>> {
        views::get_creator_pools(ctx, creator, offset)
    }

    pub fn can_create_pool(ctx: Context<CreatorTierView>, creator: Pubkey, tier: u8) -> Result<bool> {
        views::can_create_pool(ctx, creator, tier)
    }

    pub fn get_creation_fee(ctx: Context<FactoryView>, tier: u8) -> Result<u64> {
        views::get_creation_fee(ctx, tier)
    }
}
