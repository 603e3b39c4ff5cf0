//! Reusable transition predicates and boolean combinators.
//!
//! Every condition is a pure function of the agent it is evaluated against.
//! Combinators evaluate their operands in argument order and short-circuit.

use super::state_machine::Condition;

/// The read-only view of an agent that conditions need.
pub trait Perception {
    /// Distance to the current target, `f32::INFINITY` when there is none.
    fn distance_to_target(&self) -> f32;
    fn detection_range(&self) -> f32;
    fn attack_range(&self) -> f32;
    fn ideal_distance(&self) -> Option<f32>;
    fn health(&self) -> f32;
    fn max_health(&self) -> f32;

    fn health_ratio(&self) -> f32 {
        let max = self.max_health();
        if max <= 0.0 {
            0.0
        } else {
            self.health() / max
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeKind {
    Detection,
    Attack,
    Fixed(f32),
}

impl RangeKind {
    fn resolve<C: Perception>(self, agent: &C) -> f32 {
        match self {
            RangeKind::Detection => agent.detection_range(),
            RangeKind::Attack => agent.attack_range(),
            RangeKind::Fixed(range) => range,
        }
    }
}

/// Target is within `kind` range (inclusive).
pub fn in_range<C: Perception + 'static>(kind: RangeKind) -> Condition<C> {
    Box::new(move |agent: &C| agent.distance_to_target() <= kind.resolve(agent))
}

/// Target is beyond `kind` range, or there is no target.
pub fn out_of_range<C: Perception + 'static>(kind: RangeKind) -> Condition<C> {
    Box::new(move |agent: &C| agent.distance_to_target() > kind.resolve(agent))
}

/// Distance lies in `[low, high] × ideal_distance`. False for agents with no
/// ideal distance.
pub fn near_ideal_distance<C: Perception + 'static>(low: f32, high: f32) -> Condition<C> {
    Box::new(move |agent: &C| {
        agent.ideal_distance().is_some_and(|ideal| {
            let distance = agent.distance_to_target();
            distance >= ideal * low && distance <= ideal * high
        })
    })
}

pub fn health_below<C: Perception + 'static>(fraction: f32) -> Condition<C> {
    Box::new(move |agent: &C| agent.health_ratio() < fraction)
}

pub fn health_above<C: Perception + 'static>(fraction: f32) -> Condition<C> {
    Box::new(move |agent: &C| agent.health_ratio() > fraction)
}

pub fn has_target<C: Perception + 'static>() -> Condition<C> {
    Box::new(|agent: &C| agent.distance_to_target().is_finite())
}

/// True when every operand is; an empty list is true.
pub fn and<C: 'static>(conditions: impl IntoIterator<Item = Condition<C>>) -> Condition<C> {
    let conditions: Vec<_> = conditions.into_iter().collect();
    Box::new(move |agent: &C| conditions.iter().all(|c| c(agent)))
}

/// True when any operand is; an empty list is false.
pub fn or<C: 'static>(conditions: impl IntoIterator<Item = Condition<C>>) -> Condition<C> {
    let conditions: Vec<_> = conditions.into_iter().collect();
    Box::new(move |agent: &C| conditions.iter().any(|c| c(agent)))
}

pub fn not<C: 'static>(condition: Condition<C>) -> Condition<C> {
    Box::new(move |agent: &C| !condition(agent))
}

/// Wrap an arbitrary predicate.
pub fn from_fn<C: 'static>(f: impl Fn(&C) -> bool + Send + Sync + 'static) -> Condition<C> {
    Box::new(f)
}
