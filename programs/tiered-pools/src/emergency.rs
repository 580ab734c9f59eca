use anchor_lang::prelude::*;
use anchor_lang::solana_program::hash::hashv;
use anchor_spl::token::{Token, TokenAccount};
use tier_registry::state::{Role, TierRegistry};

use crate::ledger::{require_role, transfer_from_vault, PoolGovernance};
use crate::state::*;

/// Deterministic proposal id: sha256(proposer || recipient || proposed_at).
pub fn proposal_id(proposer: &Pubkey, recipient: &Pubkey, proposed_at: i64) -> [u8; 32] {
    hashv(&[
        proposer.as_ref(),
        recipient.as_ref(),
        &proposed_at.to_le_bytes(),
    ])
    .to_bytes()
}

impl ShareLedger {
    pub fn propose_emergency(
        &mut self,
        proposer: Pubkey,
        recipient: Pubkey,
        now: i64,
    ) -> Result<[u8; 32]> {
        require!(recipient != Pubkey::default(), PoolError::InvalidAddress);

        let id = proposal_id(&proposer, &recipient, now);
        require!(
            self.proposal(&id).is_none(),
            PoolError::EmergencyAlreadyProposed
        );

        staged(&mut self.emergency_proposals, |proposals| {
            if proposals.len() >= MAX_EMERGENCY_PROPOSALS {
                // Oldest cancelled entry first, then oldest executed one
                let evict = proposals
                    .iter()
                    .position(|p| p.status == ProposalStatus::Cancelled)
                    .or_else(|| {
                        proposals
                            .iter()
                            .position(|p| p.status == ProposalStatus::Executed)
                    })
                    .ok_or(PoolError::ProposalLimitReached)?;
                proposals.remove(evict);
            }
            proposals.push(EmergencyProposal {
                id,
                proposer,
                recipient,
                proposed_at: now,
                status: ProposalStatus::Pending,
            });
            Ok(())
        })?;
        Ok(id)
    }

    pub fn proposal(&self, id: &[u8; 32]) -> Option<&EmergencyProposal> {
        self.emergency_proposals.iter().find(|p| p.id == *id)
    }

    fn pending_proposal_mut(&mut self, id: &[u8; 32]) -> Result<&mut EmergencyProposal> {
        let proposal = self
            .emergency_proposals
            .iter_mut()
            .find(|p| p.id == *id)
            .ok_or(PoolError::EmergencyNotProposed)?;
        match proposal.status {
            ProposalStatus::Pending => Ok(proposal),
            ProposalStatus::Cancelled => err!(PoolError::EmergencyNotProposed),
            ProposalStatus::Executed => err!(PoolError::EmergencyAlreadyExecuted),
        }
    }

    /// Marks a proposal executed once its notice period has elapsed and
    /// clears fee and deposit accounting. Returns the recipient.
    pub fn execute_emergency(&mut self, id: &[u8; 32], now: i64) -> Result<Pubkey> {
        let delay = self.emergency_delay;
        let proposal = self.pending_proposal_mut(id)?;
        let ready_at = proposal
            .proposed_at
            .checked_add(delay)
            .ok_or(ProgramError::ArithmeticOverflow)?;
        require!(now >= ready_at, PoolError::EmergencyTimelockNotMet);

        proposal.status = ProposalStatus::Executed;
        let recipient = proposal.recipient;
        self.accrued_creator_fees = 0;
        self.total_deposits = 0;
        Ok(recipient)
    }

    pub fn cancel_emergency(&mut self, id: &[u8; 32]) -> Result<()> {
        self.pending_proposal_mut(id)?.status = ProposalStatus::Cancelled;
        Ok(())
    }
}

/// Announce an emergency sweep of the pool (admin only)
pub fn propose_emergency_withdraw(
    ctx: Context<PoolGovernance>,
    recipient: Pubkey,
) -> Result<[u8; 32]> {
    let admin = ctx.accounts.authority.key();
    require_role(&ctx.accounts.registry, &admin, Role::Admin)?;

    let clock = Clock::get()?;
    let pool = &mut ctx.accounts.pool;
    let id = pool.propose_emergency(admin, recipient, clock.unix_timestamp)?;

    emit!(EmergencyProposed {
        pool: pool.key(),
        id,
        proposer: admin,
        recipient,
        executable_at: clock.unix_timestamp.saturating_add(pool.emergency_delay),
    });

    msg!(
        "Emergency withdrawal proposed for pool {} to {}",
        pool.pool_id,
        recipient
    );
    Ok(id)
}

/// Sweep the whole vault to the proposal recipient after the notice period (admin only)
pub fn execute_emergency_withdraw(ctx: Context<ExecuteEmergency>, id: [u8; 32]) -> Result<()> {
    let admin = ctx.accounts.admin.key();
    require_role(&ctx.accounts.registry, &admin, Role::Admin)?;

    let clock = Clock::get()?;
    let recipient = ctx
        .accounts
        .proposal_recipient(&id)
        .ok_or(PoolError::EmergencyNotProposed)?;
    require_keys_eq!(
        ctx.accounts.recipient_token_account.owner,
        recipient,
        PoolError::InvalidAddress
    );

    ctx.accounts.pool.execute_emergency(&id, clock.unix_timestamp)?;

    let amount = ctx.accounts.vault.amount;
    if amount > 0 {
        transfer_from_vault(
            &ctx.accounts.pool,
            &ctx.accounts.vault,
            &ctx.accounts.recipient_token_account,
            &ctx.accounts.token_program,
            amount,
        )?;
    }

    emit!(EmergencyExecuted {
        pool: ctx.accounts.pool.key(),
        id,
        recipient,
        amount,
    });

    msg!(
        "Emergency withdrawal executed for pool {}: {} to {}",
        ctx.accounts.pool.pool_id,
        amount,
        recipient
    );
    Ok(())
}

/// Cancel a pending emergency proposal (admin only)
pub fn cancel_emergency_withdraw(
    ctx: Context<PoolGovernance>,
    id: [u8; 32],
) -> Result<()> {
    let admin = ctx.accounts.authority.key();
    require_role(&ctx.accounts.registry, &admin, Role::Admin)?;

    let pool = &mut ctx.accounts.pool;
    pool.cancel_emergency(&id)?;

    emit!(EmergencyCancelled {
        pool: pool.key(),
        id,
        cancelled_by: admin,
    });

    msg!("Emergency withdrawal cancelled for pool {}", pool.pool_id);
    Ok(())
}

impl<'info> ExecuteEmergency<'info> {
    fn proposal_recipient(&self, id: &[u8; 32]) -> Option<Pubkey> {
        self.pool.proposal(id).map(|p| p.recipient)
    }
}

#[derive(Accounts)]
pub struct ExecuteEmergency<'info> {
    pub admin: Signer<'info>,

    #[account(
        seeds = [FACTORY_SEED],
        bump = factory.bump,
        has_one = registry @ PoolError::InvalidAddress,
    )]
    pub factory: Box<Account<'info, PoolFactory>>,

    pub registry: Box<Account<'info, TierRegistry>>,

    #[account(mut, has_one = factory @ PoolError::UnknownPool)]
    pub pool: Box<Account<'info, ShareLedger>>,

    #[account(
        mut,
        seeds = [VAULT_SEED, pool.key().as_ref()],
        bump = pool.vault_bump,
        address = pool.vault @ PoolError::InvalidVault,
    )]
    pub vault: Box<Account<'info, TokenAccount>>,

    #[account(
        mut,
        constraint = recipient_token_account.mint == pool.asset_mint @ PoolError::InvalidMint
    )]
    pub recipient_token_account: Box<Account<'info, TokenAccount>>,

    pub token_program: Program<'info, Token>,
}

#[event]
pub struct EmergencyProposed {
    pub pool: Pubkey,
    pub id: [u8; 32],
    pub proposer: Pubkey,
    pub recipient: Pubkey,
    pub executable_at: i64,
}

#[event]
pub struct EmergencyExecuted {
    pub pool: Pubkey,
    pub id: [u8; 32],
    pub recipient: Pubkey,
    pub amount: u64,
}

#[event]
pub struct EmergencyCancelled {
    pub pool: Pubkey,
    pub id: [u8; 32],
    pub cancelled_by: Pubkey,
}
