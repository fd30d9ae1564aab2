//! Custom Resource Definitions served by the operator

mod condition;
mod model;
mod prompt;

pub use condition::{reasons, Condition, ConditionSet, ConditionStatus, TYPE_READY, TYPE_SYNCED};
pub use model::{Model, ModelSpec, ModelStatus, OllamaModelDetails};
pub use prompt::{
    ImageData, ImageFormat, ImageSource, KeySelector, ModelRef, Prompt, PromptResponseMeta,
    PromptResponseMetrics, PromptSpec, PromptStatus,
};

/// Resources whose status carries a [`ConditionSet`]
pub trait Conditioned: kube::Resource {
    /// Current conditions, if status has been initialised
    fn conditions(&self) -> Option<&ConditionSet>;

    /// Conditions, initialising status when absent
    fn conditions_mut(&mut self) -> &mut ConditionSet;

    /// Condition of the given type
    fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().and_then(|set| set.get(type_))
    }

    /// Set conditions stamped with the resource's current generation
    fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>)
    where
        Self: Sized,
    {
        let generation = kube::Resource::meta(self).generation.unwrap_or(0);
        self.conditions_mut().set(
            conditions
                .into_iter()
                .map(|c| c.with_observed_generation(generation)),
        );
    }

    /// True when the resource reports exactly Synced=True and Ready=True
    fn is_synced_and_ready(&self) -> bool {
        let expected = ConditionSet::from_conditions([
            Condition::reconcile_success(),
            Condition::available(),
        ]);
        self.conditions()
            .is_some_and(|set| set.equivalent(&expected))
    }
}
