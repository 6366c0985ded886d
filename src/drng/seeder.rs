/// Seeding scheduler.
///
/// Decides when a DRNG must reseed, composes seed buffers from the
/// entropy sources, and walks the per-node pool during initial seeding.
/// The global pool trylock admits at most one seeding operation at a
/// time; a generator that loses the race latches `force_reseed` and keeps
/// generating.
use super::instance::DrngInstance;
use super::seed_buffer::SeedBuffer;
use crate::state::SeedState;
use crate::{accounting, now_secs, EsdmContext, EsdmResult, NODE_STAGGER_SECS, RESEED_MAX_SECS};
use std::sync::Arc;

/// Reseed criteria: request budget exhausted, operator/failure latch, or
/// the wall-clock deadline passed. Each evaluation accounts one generate
/// operation against the budget.
pub fn must_reseed(drng: &DrngInstance) -> bool {
    let budget_exhausted = drng.consume_request();
    budget_exhausted
        || drng.reseed_forced()
        || now_secs() > drng.last_seeded().saturating_add(RESEED_MAX_SECS)
}

/// Seed one DRNG from all entropy sources. The caller must hold the pool
/// lock. The same seed material also feeds the atomic-fallback DRNG.
/// Returns whether the round amounted to a full seed.
pub fn seed_drng(ctx: &EsdmContext, drng: &DrngInstance) -> EsdmResult<bool> {
    let names = ctx.sources.names();
    let mut buf = SeedBuffer::for_sources(&names);
    let hash = drng.hash_cb();

    let requested = accounting::requested_bits(drng.fully_seeded(), &ctx.config);
    for (idx, src) in ctx.sources.sources().iter().enumerate() {
        let claimed = src.poll(requested, &ctx.config, buf.slot_mut(idx), hash.as_ref());
        let credited = if src.osr_applied_on_insert() {
            claimed
        } else {
            accounting::apply_osr(claimed, &ctx.config)
        };
        buf.slot_mut(idx).set_bits(credited);
        tracing::debug!(
            source = src.name(),
            claimed,
            credited,
            source_full = src.fully_seeded(credited, &ctx.config),
            "source polled"
        );
    }

    let credited_total = buf.credited_bits();
    let is_full = accounting::is_full_seed(credited_total);
    let seed = buf.flatten();

    drng.inject(&seed, is_full)?;

    // The atomic-fallback DRNG rides along on every seeding operation
    if let Ok(atomic) = ctx.manager.atomic_instance() {
        if !std::ptr::eq(atomic.as_ref() as *const DrngInstance, drng as *const DrngInstance) {
            let _ = atomic.inject(&seed, is_full);
        }
    }

    tracing::info!(
        drng = drng.name(),
        credited = credited_total,
        full = is_full,
        "seeding round complete"
    );

    if accounting::is_min_seed(credited_total) {
        ctx.state.advance_to(SeedState::MinSeeded);
    }
    if is_full {
        ctx.state.advance_to(SeedState::FullySeeded);
        if ctx.manager.avail() {
            ctx.state.advance_to(SeedState::Operational);
        }
    }

    // Walk the threshold ladder: every rung this round met moves the
    // target to the next one
    let mut threshold = ctx.manager.seed_threshold();
    while credited_total >= threshold {
        match accounting::next_threshold(threshold) {
            Some(next) => {
                ctx.manager.raise_seed_threshold(next);
                threshold = next;
            }
            None => break,
        }
    }

    Ok(is_full)
}

/// One seeding pass over the DRNG pool, run by the seeder thread and by
/// `rnd_reseed_crng`.
///
/// Seeds the first not-fully-seeded per-node DRNG and repeats while the
/// entropy pool still asks for more material and the rounds make
/// progress. Deadlines of freshly seeded nodes are staggered to avoid a
/// reseed storm later. Contention on the pool lock means another seeding
/// operation is already running, which is success from the caller's view.
pub fn seed_work(ctx: &EsdmContext) -> EsdmResult<()> {
    // A manager that failed its selftests stays unusable
    if !ctx.manager.avail() {
        return Ok(());
    }
    let Some(_pool) = ctx.manager.pool_try_lock() else {
        return Ok(());
    };

    loop {
        if ctx.is_shutdown() {
            return Ok(());
        }

        ctx.manager.ensure_node_instances(&ctx.config)?;

        let target: Option<Arc<DrngInstance>> = {
            let instances = ctx.manager.get_instances();
            instances
                .iter()
                .flatten()
                .find(|inst| !inst.fully_seeded())
                .cloned()
        };

        let Some(inst) = target else {
            // Every per-node DRNG is fully seeded
            ctx.manager.mark_all_nodes_seeded(&ctx.state);
            return Ok(());
        };

        let was_full = match seed_drng(ctx, &inst) {
            Ok(full) => full,
            Err(e) => {
                tracing::warn!(drng = inst.name(), error = %e, "seeding pass aborted");
                return Ok(());
            }
        };

        if !was_full {
            // The sources cannot satisfy a full seed right now; retry on
            // the next wakeup instead of spinning
            return Ok(());
        }

        if let Some(node) = inst.node() {
            inst.advance_last_seeded(u64::from(node) * NODE_STAGGER_SECS);
        }
    }
}

/// Reseed instances whose wall-clock deadline passed even though nobody
/// generates from them. Run periodically by the seeder thread so an idle
/// daemon does not hold a stale seed forever.
pub fn reseed_overdue(ctx: &EsdmContext) {
    if !ctx.manager.avail() {
        return;
    }
    let Some(_pool) = ctx.manager.pool_try_lock() else {
        return;
    };

    let mut due: Vec<Arc<DrngInstance>> = {
        let instances = ctx.manager.get_instances();
        instances.iter().flatten().cloned().collect()
    };
    if let Ok(atomic) = ctx.manager.atomic_instance() {
        due.push(atomic);
    }

    for inst in due {
        if ctx.is_shutdown() {
            return;
        }
        let overdue = now_secs() > inst.last_seeded().saturating_add(RESEED_MAX_SECS);
        if (overdue || inst.reseed_forced()) && inst.fully_seeded() {
            if let Err(e) = seed_drng(ctx, &inst) {
                tracing::warn!(drng = inst.name(), error = %e, "deadline reseed failed");
            }
        }
    }
}
