//! Per-card interaction state machine.
//!
//! Transitions follow a fixed table. Non-critical transitions go through an
//! animation queue and are applied one at a time, each held for the animation
//! duration. `Error` and `Disable` are critical: they apply immediately and drop
//! whatever was still queued.
//!
//! ```text
//! idle --HoverStart--> hovering --HoverEnd--> idle
//! idle --Select--> selected --Deselect--> idle
//! idle --StartLoading--> loading --FinishLoading--> selected
//! error --Reset--> idle, error --StartLoading--> loading
//! * --Disable--> disabled --Enable--> idle
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::debounce::Debouncer;

const HISTORY_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    Idle,
    Hovering,
    Selected,
    Loading,
    Error,
    Disabled,
    Animating,
}

impl fmt::Display for InteractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InteractionState::Idle => "idle",
            InteractionState::Hovering => "hovering",
            InteractionState::Selected => "selected",
            InteractionState::Loading => "loading",
            InteractionState::Error => "error",
            InteractionState::Disabled => "disabled",
            InteractionState::Animating => "animating",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionEvent {
    HoverStart,
    HoverEnd,
    Select,
    Deselect,
    StartLoading,
    FinishLoading,
    Error,
    Reset,
    Disable,
    Enable,
}

impl InteractionEvent {
    /// Critical events bypass the animation queue.
    pub fn is_critical(self) -> bool {
        matches!(self, InteractionEvent::Error | InteractionEvent::Disable)
    }
}

/// The transition table. `None` means the event is not accepted in `from`.
pub fn next_state(from: InteractionState, event: InteractionEvent) -> Option<InteractionState> {
    use InteractionEvent as E;
    use InteractionState as S;

    match (from, event) {
        (S::Animating, _) => None,
        (_, E::Disable) => Some(S::Disabled),
        (S::Idle, E::HoverStart) => Some(S::Hovering),
        (S::Idle, E::Select) => Some(S::Selected),
        (S::Idle, E::StartLoading) => Some(S::Loading),
        (S::Idle | S::Hovering | S::Selected | S::Loading, E::Error) => Some(S::Error),
        (S::Hovering, E::HoverEnd) => Some(S::Idle),
        (S::Selected, E::HoverStart | E::HoverEnd) => Some(S::Selected),
        (S::Selected, E::Deselect) => Some(S::Idle),
        (S::Loading, E::FinishLoading) => Some(S::Selected),
        (S::Error, E::Reset) => Some(S::Idle),
        (S::Error, E::StartLoading) => Some(S::Loading),
        (S::Disabled, E::Enable) => Some(S::Idle),
        _ => None,
    }
}

/// Shortest event path from `from` to `to` through the transition table.
/// Hovering already satisfies an idle target.
pub fn plan_path(from: InteractionState, to: InteractionState) -> Vec<InteractionEvent> {
    use InteractionEvent as E;
    use InteractionState as S;

    if from == to {
        return Vec::new();
    }
    let prefixed = |event: E, via: S| {
        let mut path = vec![event];
        path.extend(plan_path(via, to));
        path
    };
    match (from, to) {
        (S::Hovering, S::Idle) => Vec::new(),
        (_, S::Disabled) => vec![E::Disable],
        (S::Disabled, _) => prefixed(E::Enable, S::Idle),
        (S::Idle | S::Hovering | S::Selected | S::Loading, S::Error) => vec![E::Error],
        (S::Error, S::Loading) => vec![E::StartLoading],
        (S::Error, _) => prefixed(E::Reset, S::Idle),
        (S::Hovering, _) => prefixed(E::HoverEnd, S::Idle),
        (S::Selected, _) => prefixed(E::Deselect, S::Idle),
        (S::Loading, _) => prefixed(E::FinishLoading, S::Selected),
        (S::Idle, S::Selected) => vec![E::Select],
        (S::Idle, S::Loading) => vec![E::StartLoading],
        _ => Vec::new(),
    }
}

/// What the rest of the app currently believes about a card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardTruth {
    pub selected: bool,
    pub generating: bool,
    pub error: bool,
    pub disabled: bool,
}

impl CardTruth {
    pub fn desired_state(&self) -> InteractionState {
        if self.disabled {
            InteractionState::Disabled
        } else if self.error {
            InteractionState::Error
        } else if self.generating {
            InteractionState::Loading
        } else if self.selected {
            InteractionState::Selected
        } else {
            InteractionState::Idle
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    pub hover_debounce: Duration,
    pub animation: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            hover_debounce: Duration::from_millis(100),
            animation: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: InteractionState,
    pub event: InteractionEvent,
    pub to: InteractionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied(InteractionState),
    Queued,
    NoOp,
    Rejected,
}

struct MachineCore {
    state: InteractionState,
    queue: VecDeque<InteractionEvent>,
    animating: bool,
    history: VecDeque<Transition>,
}

impl MachineCore {
    /// State once every queued transition has run.
    fn projected(&self) -> InteractionState {
        self.queue.iter().fold(self.state, |state, event| {
            next_state(state, *event).unwrap_or(state)
        })
    }

    fn apply(&mut self, style_id: u32, event: InteractionEvent, to: InteractionState) {
        let transition = Transition {
            from: self.state,
            event,
            to,
        };
        debug!(style_id, from = %transition.from, ?event, to = %to, "card transition");
        self.state = to;
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(transition);
    }
}

struct MachineShared {
    style_id: u32,
    config: MachineConfig,
    core: Mutex<MachineCore>,
}

impl MachineShared {
    fn dispatch(self: &Arc<Self>, event: InteractionEvent) -> DispatchOutcome {
        let Ok(mut core) = self.core.lock() else {
            return DispatchOutcome::Rejected;
        };

        if event.is_critical() {
            if let Some(to) = next_state(core.state, event) {
                if to == core.state {
                    if core.queue.is_empty() {
                        return DispatchOutcome::NoOp;
                    }
                    // Already there: only the queued way out has to go.
                    core.queue.clear();
                    debug!(style_id = self.style_id, ?event, "dropped queued transitions");
                    return DispatchOutcome::Applied(to);
                }
                core.queue.clear();
                core.apply(self.style_id, event, to);
                return DispatchOutcome::Applied(to);
            }
        }

        let projected = core.projected();
        match next_state(projected, event) {
            None => {
                warn!(
                    style_id = self.style_id,
                    state = %projected,
                    ?event,
                    "ignoring invalid card transition"
                );
                DispatchOutcome::Rejected
            }
            Some(to) if to == projected => DispatchOutcome::NoOp,
            Some(_) => {
                core.queue.push_back(event);
                if !core.animating {
                    core.animating = true;
                    tokio::spawn(Arc::clone(self).drain_queue());
                }
                DispatchOutcome::Queued
            }
        }
    }

    async fn drain_queue(self: Arc<Self>) {
        loop {
            let applied = {
                let Ok(mut core) = self.core.lock() else {
                    return;
                };
                let Some(event) = core.queue.pop_front() else {
                    core.animating = false;
                    return;
                };
                match next_state(core.state, event) {
                    Some(to) => {
                        core.apply(self.style_id, event, to);
                        true
                    }
                    None => {
                        warn!(
                            style_id = self.style_id,
                            state = %core.state,
                            ?event,
                            "dropping stale queued transition"
                        );
                        false
                    }
                }
            };
            if applied {
                sleep(self.config.animation).await;
            }
        }
    }
}

/// One card's visual state. Must be created inside a tokio runtime.
pub struct InteractionMachine {
    shared: Arc<MachineShared>,
    hover: Debouncer<()>,
}

impl InteractionMachine {
    pub fn mount(style_id: u32, truth: CardTruth, config: MachineConfig) -> Self {
        let shared = Arc::new(MachineShared {
            style_id,
            config,
            core: Mutex::new(MachineCore {
                state: truth.desired_state(),
                queue: VecDeque::new(),
                animating: false,
                history: VecDeque::new(),
            }),
        });
        let weak: Weak<MachineShared> = Arc::downgrade(&shared);
        let hover = Debouncer::new(config.hover_debounce, move |_: ()| {
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(InteractionEvent::HoverStart);
            }
        });
        Self { shared, hover }
    }

    pub fn style_id(&self) -> u32 {
        self.shared.style_id
    }

    pub fn dispatch(&self, event: InteractionEvent) -> DispatchOutcome {
        self.shared.dispatch(event)
    }

    /// Hover only registers after the pointer rests for the hover debounce.
    pub fn hover_start(&self) {
        self.hover.call(());
    }

    pub fn hover_end(&self) -> DispatchOutcome {
        if self.hover.cancel() {
            return DispatchOutcome::NoOp;
        }
        self.dispatch(InteractionEvent::HoverEnd)
    }

    /// Steers the card toward what `truth` implies. Safe to call on every render.
    pub fn reconcile(&self, truth: CardTruth) -> Vec<DispatchOutcome> {
        let projected = self.projected_state();
        plan_path(projected, truth.desired_state())
            .into_iter()
            .map(|event| self.dispatch(event))
            .collect()
    }

    /// Settled logical state.
    pub fn state(&self) -> InteractionState {
        self.with_core(|core| core.state)
            .unwrap_or(InteractionState::Idle)
    }

    /// State once queued transitions have played out.
    pub fn projected_state(&self) -> InteractionState {
        self.with_core(MachineCore::projected)
            .unwrap_or(InteractionState::Idle)
    }

    /// What the card should render right now.
    pub fn visual_state(&self) -> InteractionState {
        self.with_core(|core| {
            if core.animating {
                InteractionState::Animating
            } else {
                core.state
            }
        })
        .unwrap_or(InteractionState::Idle)
    }

    pub fn is_animating(&self) -> bool {
        self.with_core(|core| core.animating).unwrap_or(false)
    }

    pub fn pending_transitions(&self) -> usize {
        self.with_core(|core| core.queue.len()).unwrap_or(0)
    }

    pub fn history(&self) -> Vec<Transition> {
        self.with_core(|core| core.history.iter().copied().collect())
            .unwrap_or_default()
    }

    fn with_core<T>(&self, read: impl FnOnce(&MachineCore) -> T) -> Option<T> {
        self.shared.core.lock().ok().map(|core| read(&core))
    }
}

impl Drop for InteractionMachine {
    fn drop(&mut self) {
        if let Ok(mut core) = self.shared.core.lock() {
            core.queue.clear();
        }
    }
}
