//! Frequency gate deciding whether a system runs for a given context.

use crate::clock::elapsed_ms;
use crate::models::{ExecutionContext, Frequency, GameEvent, SystemDefinition};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Inputs the gate needs besides the context itself.
#[derive(Debug, Clone, Copy)]
pub struct GateState {
    pub last_execution: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    /// Interval used when a periodic system declares none.
    pub default_interval_ms: u64,
}

/// Decide eligibility from the system's declared frequency.
pub fn should_execute<F>(
    definition: &SystemDefinition,
    state: GateState,
    context: &ExecutionContext,
    is_relevant: F,
) -> bool
where
    F: Fn(&GameEvent, &ExecutionContext) -> bool,
{
    let eligible = match definition.frequency {
        Frequency::EveryTick => true,
        Frequency::Periodic => {
            let interval = definition.interval_ms.unwrap_or(state.default_interval_ms);
            match state.last_execution {
                None => true,
                Some(last) => elapsed_ms(last, state.now) >= interval,
            }
        }
        Frequency::EventDriven => context
            .active_events
            .iter()
            .any(|event| is_relevant(event, context)),
        Frequency::OnDemand => context.trigger.is_explicit(),
        Frequency::Unknown => true,
    };

    debug!(
        "Gate for '{}' ({}): {}",
        definition.id,
        definition.frequency,
        if eligible { "eligible" } else { "skipped" }
    );

    eligible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GameStateSnapshot, TriggerType};
    use chrono::Duration;
    use std::sync::Arc;

    fn context() -> ExecutionContext {
        ExecutionContext::new(
            "exec-1",
            Arc::new(GameStateSnapshot {
                tick: 1,
                taken_at: Utc::now(),
                data: serde_json::Value::Null,
            }),
        )
    }

    fn state(last_ms_ago: Option<i64>) -> GateState {
        let now = Utc::now();
        GateState {
            last_execution: last_ms_ago.map(|ms| now - Duration::milliseconds(ms)),
            now,
            default_interval_ms: 300_000,
        }
    }

    fn never(_: &GameEvent, _: &ExecutionContext) -> bool {
        false
    }

    #[test]
    fn test_every_tick_always() {
        let def = SystemDefinition::new("s", "S");
        assert!(should_execute(&def, state(Some(0)), &context(), never));
    }

    #[test]
    fn test_periodic() {
        let def = SystemDefinition::new("s", "S").periodic(300_000);

        assert!(should_execute(&def, state(None), &context(), never));
        assert!(!should_execute(&def, state(Some(100_000)), &context(), never));
        assert!(should_execute(&def, state(Some(300_000)), &context(), never));
    }

    #[test]
    fn test_periodic_uses_default_interval() {
        let mut def = SystemDefinition::new("s", "S").frequency(Frequency::Periodic);
        def.interval_ms = None;

        assert!(!should_execute(&def, state(Some(299_999)), &context(), never));
        assert!(should_execute(&def, state(Some(300_001)), &context(), never));
    }

    #[test]
    fn test_on_demand_requires_explicit_trigger() {
        let def = SystemDefinition::new("s", "S").frequency(Frequency::OnDemand);

        assert!(!should_execute(&def, state(None), &context(), never));
        let ctx = context().with_trigger(TriggerType::PlayerAction);
        assert!(should_execute(&def, state(None), &ctx, never));
        let ctx = context().with_trigger(TriggerType::AiTriggered);
        assert!(should_execute(&def, state(None), &ctx, never));
    }

    #[test]
    fn test_event_driven() {
        let def = SystemDefinition::new("s", "S").frequency(Frequency::EventDriven);
        let is_war = |e: &GameEvent, _: &ExecutionContext| e.event_type == "war_declaration";

        let ctx = context().with_events(vec![GameEvent::new("harvest", "farm", Utc::now())]);
        assert!(!should_execute(&def, state(None), &ctx, is_war));

        let ctx = context().with_events(vec![
            GameEvent::new("harvest", "farm", Utc::now()),
            GameEvent::new("war_declaration", "diplomacy", Utc::now()),
        ]);
        assert!(should_execute(&def, state(None), &ctx, is_war));

        assert!(!should_execute(&def, state(None), &context(), is_war));
    }

    #[test]
    fn test_unknown_frequency_fails_open() {
        let def = SystemDefinition::new("s", "S").frequency(Frequency::Unknown);
        assert!(should_execute(&def, state(Some(0)), &context(), never));
    }
}
