//! Stage execution: plan, compute, commit
//!
//! Planning is async and sequential: it resolves input versions, skips
//! targets that are already up to date and loads the inputs of the rest.
//! Computation runs the user callables, in parallel when the `rayon`
//! feature and `parallel_stages` are enabled. Results are committed one by
//! one in planning order, so the commit sequence depends only on the inputs.

use super::{BatchReport, Stage, Targets};
use crate::array::NumericArray;
use crate::kv::KvStore;
use crate::lineage::VersionRef;
use crate::measure::{self, MeasureKind, MeasureSpec};
use crate::naming::{DerivedName, NameRole};
use crate::object::{Category, EvalData, Measure, ParamValue, Payload, RepoObject};
use crate::payload::PayloadStore;
use crate::repository::Repository;
use crate::store::{Fetch, ModifierFilter, VersionSelector};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

type Compute = Box<dyn FnOnce() -> anyhow::Result<RepoObject> + Send>;
type Inputs = BTreeMap<String, u64>;
type Outcome = std::result::Result<RepoObject, String>;

struct WorkItem {
    target: String,
    inputs: Inputs,
    compute: Compute,
}

enum Plan {
    Ready(WorkItem),
    UpToDate(String),
}

fn invoke(compute: Compute) -> Outcome {
    match catch_unwind(AssertUnwindSafe(compute)) {
        Ok(Ok(object)) => Ok(object),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(_) => Err("user function panicked".to_string()),
    }
}

#[cfg(feature = "rayon")]
fn compute_parallel(items: Vec<WorkItem>) -> Vec<(String, Inputs, Outcome)> {
    use rayon::prelude::*;
    items
        .into_par_iter()
        .map(|item| (item.target, item.inputs, invoke(item.compute)))
        .collect()
}

/// Column names for model output: the data's target names when the widths agree.
fn output_names(predicted: &NumericArray, targets: &[String]) -> Vec<String> {
    let width = predicted.row_width();
    if !targets.is_empty() && targets.len() == width {
        targets.to_vec()
    } else {
        (0..width).map(|i| format!("y{i}")).collect()
    }
}

/// Base model name from `m`, `m/model`, `m/model_param`, ...
fn model_base(name: &str) -> String {
    DerivedName::parse(name)
        .ok()
        .and_then(|d| d.model().map(str::to_string))
        .unwrap_or_else(|| name.to_string())
}

impl<S: KvStore, P: PayloadStore> Repository<S, P> {
    /// Evaluate calibrated models on data sets.
    ///
    /// Model selectors address the calibrated model (`m` and `m/model` are
    /// both accepted); [`Targets::All`] pairs every model definition with
    /// every training and test data set. Each result is stored as
    /// `m/eval/d` with lineage `{m/model: v, d: w}`.
    ///
    /// # Errors
    /// - [`Error::StageInProgress`] if another stage is running
    /// - [`Error::StageExecution`] if every attempted iteration failed
    pub async fn run_evaluation(&self, models: Targets, data: Targets) -> Result<BatchReport> {
        let _guard = self.jobs.begin(Stage::Evaluation)?;
        self.cancel.reset();
        let mut report = BatchReport::new(Stage::Evaluation);

        let models = self.model_targets(models).await;
        let data = match data {
            Targets::All => {
                let mut names = self.store.get_names(Category::TrainingData).await;
                names.extend(self.store.get_names(Category::TestData).await);
                names.into_iter().map(|n| (n, VersionSelector::Latest)).collect()
            }
            Targets::Names(names) => names,
        };

        let mut items = Vec::new();
        'plan: for (model, model_sel) in &models {
            for (data_name, data_sel) in &data {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'plan;
                }
                let mut inputs = Inputs::new();
                match self
                    .plan_evaluation(model, *model_sel, data_name, *data_sel, &mut inputs)
                    .await
                {
                    Ok(Plan::Ready(item)) => items.push(item),
                    Ok(Plan::UpToDate(name)) => report.up_to_date.push(name),
                    Err(e) => report.fail(format!("{model}/eval/{data_name}"), inputs, e),
                }
            }
        }
        self.execute(report, items).await
    }

    /// Train models into calibrated models.
    ///
    /// Model selectors address the model definition. Without explicit
    /// `training_data` the first `TRAINING_DATA` name is used. Lineage covers
    /// the definition, the data and (when stored) `m/model_param` and
    /// `m/training_param`.
    ///
    /// # Errors
    /// - [`Error::StageInProgress`] if another stage is running
    /// - [`Error::NotFound`] if no training data exists
    /// - [`Error::StageExecution`] if every attempted iteration failed
    pub async fn run_training(&self, models: Targets, training_data: Option<&str>) -> Result<BatchReport> {
        let _guard = self.jobs.begin(Stage::Training)?;
        self.cancel.reset();
        let mut report = BatchReport::new(Stage::Training);

        let data = match training_data {
            Some(name) => name.to_string(),
            None => self
                .store
                .get_names(Category::TrainingData)
                .await
                .into_iter()
                .next()
                .ok_or_else(|| Error::not_found(Category::TrainingData.as_str(), None))?,
        };

        let mut items = Vec::new();
        for (model, selector) in self.model_targets(models).await {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let mut inputs = Inputs::new();
            match self.plan_training(&model, selector, &data, &mut inputs).await {
                Ok(Plan::Ready(item)) => items.push(item),
                Ok(Plan::UpToDate(name)) => report.up_to_date.push(name),
                Err(e) => report.fail(format!("{model}/model"), inputs, e),
            }
        }
        self.execute(report, items).await
    }

    /// Compute the configured measures for evaluations.
    ///
    /// The configuration is the latest object named
    /// [`RepoConfig::measure_config_name`](crate::config::RepoConfig). Each
    /// measure is stored as `m/measure/d/x` with the evaluation's lineage plus
    /// the evaluation and configuration versions.
    ///
    /// # Errors
    /// - [`Error::StageInProgress`] if another stage is running
    /// - [`Error::NotFound`] if no measure configuration exists
    /// - [`Error::StageExecution`] if every attempted iteration failed
    pub async fn run_measures(&self, evaluations: Targets) -> Result<BatchReport> {
        let _guard = self.jobs.begin(Stage::Measures)?;
        self.cancel.reset();
        let mut report = BatchReport::new(Stage::Measures);

        let config_name = self.config.measure_config_name.clone();
        let config_object = self
            .store
            .get(&config_name, VersionSelector::Latest, Fetch::Metadata)
            .await?;
        let config_version = config_object.version();
        let Payload::MeasureConfiguration(config) = config_object.into_payload() else {
            return Err(Error::InvalidInput(format!(
                "'{config_name}' is not a measure configuration"
            )));
        };

        let evaluations = match evaluations {
            Targets::All => self
                .store
                .get_names(Category::EvalData)
                .await
                .into_iter()
                .map(|n| (n, VersionSelector::Latest))
                .collect(),
            Targets::Names(names) => names,
        };

        let mut items = Vec::new();
        'plan: for (eval, selector) in &evaluations {
            for (measure_name, spec) in config.iter() {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'plan;
                }
                let mut inputs = Inputs::new();
                inputs.insert(config_name.clone(), config_version);
                match self
                    .plan_measure(eval, *selector, measure_name, spec, &mut inputs)
                    .await
                {
                    Ok(Plan::Ready(item)) => items.push(item),
                    Ok(Plan::UpToDate(name)) => report.up_to_date.push(name),
                    Err(e) => report.fail(format!("{eval}:{measure_name}"), inputs, e),
                }
            }
        }
        self.execute(report, items).await
    }

    async fn model_targets(&self, targets: Targets) -> Vec<(String, VersionSelector)> {
        match targets {
            Targets::All => self
                .store
                .get_names(Category::Model)
                .await
                .into_iter()
                .map(|n| (n, VersionSelector::Latest))
                .collect(),
            Targets::Names(names) => names
                .into_iter()
                .map(|(name, selector)| (model_base(&name), selector))
                .collect(),
        }
    }

    async fn already_computed(&self, name: &str, filter: &ModifierFilter) -> Result<bool> {
        match self.store.get_matching(name, filter, Fetch::Metadata).await {
            Ok(matches) => Ok(!matches.is_empty()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn plan_evaluation(
        &self,
        model: &str,
        model_sel: VersionSelector,
        data: &str,
        data_sel: VersionSelector,
        inputs: &mut Inputs,
    ) -> Result<Plan> {
        let eval_name = DerivedName::eval_data(model, data)?.to_string();
        let calibrated = DerivedName::calibrated_model(model)?.to_string();
        let model_version = self.store.resolve_version(&calibrated, model_sel).await?;
        inputs.insert(calibrated.clone(), model_version);
        let data_version = self.store.resolve_version(data, data_sel).await?;
        inputs.insert(data.to_string(), data_version);

        let filter: ModifierFilter = inputs.iter().map(|(n, v)| (n.clone(), *v)).collect();
        if self.already_computed(&eval_name, &filter).await? {
            return Ok(Plan::UpToDate(eval_name));
        }

        let definition = self
            .store
            .get(model, VersionSelector::Latest, Fetch::Metadata)
            .await?;
        let Payload::Model(definition) = definition.payload() else {
            return Err(Error::InvalidInput(format!("'{model}' is not a model definition")));
        };
        let eval_fn = self.functions.eval(definition.eval_function())?;

        let state = self
            .store
            .get(&calibrated, VersionSelector::Exact(model_version), Fetch::Full)
            .await?;
        let Payload::CalibratedModel(state) = state.into_payload() else {
            return Err(Error::InvalidInput(format!("'{calibrated}' is not a calibrated model")));
        };
        let raw = self
            .store
            .get(data, VersionSelector::Exact(data_version), Fetch::Full)
            .await?
            .to_raw_data()?;

        let lineage = inputs.clone();
        let target = eval_name.clone();
        let compute: Compute = Box::new(move || {
            let predicted = eval_fn(&state, &raw)?;
            if predicted.rows() != raw.n_rows() {
                anyhow::bail!(
                    "evaluation returned {} rows for {} input rows",
                    predicted.rows(),
                    raw.n_rows()
                );
            }
            let names = output_names(&predicted, raw.y_coord_names());
            let payload = Payload::EvalData(EvalData::new(predicted, names));
            Ok(RepoObject::new(target, Category::EvalData, payload)?.with_modification_info(lineage))
        });
        Ok(Plan::Ready(WorkItem {
            target: eval_name,
            inputs: inputs.clone(),
            compute,
        }))
    }

    async fn optional_params(&self, name: &str, inputs: &mut Inputs) -> Result<ParamValue> {
        let Some(version) = self.store.latest_version(name).await else {
            return Ok(ParamValue::Null);
        };
        let object = self
            .store
            .get(name, VersionSelector::Exact(version), Fetch::Metadata)
            .await?;
        let params = object
            .as_params()
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("'{name}' does not hold parameters")))?;
        inputs.insert(name.to_string(), version);
        Ok(params)
    }

    async fn plan_training(
        &self,
        model: &str,
        selector: VersionSelector,
        data: &str,
        inputs: &mut Inputs,
    ) -> Result<Plan> {
        let calibrated = DerivedName::calibrated_model(model)?.to_string();
        let definition_version = self.store.resolve_version(model, selector).await?;
        inputs.insert(model.to_string(), definition_version);
        let definition = self
            .store
            .get(model, VersionSelector::Exact(definition_version), Fetch::Metadata)
            .await?;
        let Payload::Model(definition) = definition.payload() else {
            return Err(Error::InvalidInput(format!("'{model}' is not a model definition")));
        };
        let train_name = definition.train_function().ok_or_else(|| {
            Error::InvalidInput(format!("model '{model}' has no training function"))
        })?;
        let train_fn = self.functions.training(train_name)?;

        let data_version = self.store.resolve_version(data, VersionSelector::Latest).await?;
        inputs.insert(data.to_string(), data_version);
        let model_param = self
            .optional_params(&DerivedName::model_param(model)?.to_string(), inputs)
            .await?;
        let training_param = self
            .optional_params(&DerivedName::training_param(model)?.to_string(), inputs)
            .await?;

        let filter: ModifierFilter = inputs.iter().map(|(n, v)| (n.clone(), *v)).collect();
        if self.already_computed(&calibrated, &filter).await? {
            return Ok(Plan::UpToDate(calibrated));
        }

        let raw = self
            .store
            .get(data, VersionSelector::Exact(data_version), Fetch::Full)
            .await?
            .to_raw_data()?;
        let lineage = inputs.clone();
        let target = calibrated.clone();
        let compute: Compute = Box::new(move || {
            let trained = train_fn(&model_param, &training_param, &raw)?;
            Ok(
                RepoObject::new(target, Category::CalibratedModel, Payload::CalibratedModel(trained))?
                    .with_modification_info(lineage),
            )
        });
        Ok(Plan::Ready(WorkItem {
            target: calibrated,
            inputs: inputs.clone(),
            compute,
        }))
    }

    async fn plan_measure(
        &self,
        eval: &str,
        selector: VersionSelector,
        measure_name: &str,
        spec: &MeasureSpec,
        inputs: &mut Inputs,
    ) -> Result<Plan> {
        let derived = DerivedName::parse(eval)?;
        let (Some(model), Some(data), NameRole::EvalData) = (derived.model(), derived.data(), derived.role())
        else {
            return Err(Error::InvalidName(format!("'{eval}' is not an evaluation name")));
        };
        let target = DerivedName::measure(model, data, measure_name)?.to_string();
        let eval_version = self.store.resolve_version(eval, selector).await?;
        inputs.insert(eval.to_string(), eval_version);

        let filter: ModifierFilter = inputs.iter().map(|(n, v)| (n.clone(), *v)).collect();
        if self.already_computed(&target, &filter).await? {
            return Ok(Plan::UpToDate(target));
        }

        let evaluation = self
            .store
            .get(eval, VersionSelector::Exact(eval_version), Fetch::Full)
            .await?;
        let data_selector = evaluation
            .info()
            .modifier_version(data)
            .map_or(VersionSelector::Latest, VersionSelector::Exact);
        let raw = self
            .store
            .get(data, data_selector, Fetch::Full)
            .await?
            .to_raw_data()?;
        let Payload::EvalData(output) = evaluation.payload() else {
            return Err(Error::InvalidInput(format!("'{eval}' holds no evaluation output")));
        };
        let predicted = output
            .x_data()
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("'{eval}' has no stored predictions")))?;
        let predicted_names = output.x_coord_names().to_vec();
        let actual = raw
            .y_data()
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("data '{data}' has no target values")))?;
        let actual_names = raw.y_coord_names().to_vec();

        let reduction = match spec.kind() {
            MeasureKind::Registered(name) => Some(self.functions.reduction(name)?),
            _ => None,
        };
        let kind = spec.kind().clone();
        let coordinates = spec.coordinates().map(<[String]>::to_vec);
        let mut lineage = evaluation.info().modification_info().clone();
        lineage.extend(inputs.iter().map(|(n, v)| (n.clone(), *v)));

        let name = target.clone();
        let compute: Compute = Box::new(move || {
            let (p, a) = measure::aligned_columns(
                (&predicted, predicted_names.as_slice()),
                (&actual, actual_names.as_slice()),
                coordinates.as_deref(),
            )?;
            let value = match &reduction {
                Some(f) => f(p.as_slice(), a.as_slice())?,
                None => measure::reduce(&kind, &p, &a)?,
            };
            Ok(RepoObject::new(name, Category::Measure, Payload::Measure(Measure { value }))?
                .with_modification_info(lineage))
        });
        Ok(Plan::Ready(WorkItem {
            target,
            inputs: inputs.clone(),
            compute,
        }))
    }

    async fn execute(&self, mut report: BatchReport, items: Vec<WorkItem>) -> Result<BatchReport> {
        if report.cancelled {
            return report.into_result();
        }
        debug!(stage = %report.stage(), pending = items.len(), "computing stage results");

        #[cfg(feature = "rayon")]
        if self.config.parallel_stages && items.len() > 1 {
            for (target, inputs, outcome) in compute_parallel(items) {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                self.commit_outcome(&mut report, target, inputs, outcome).await;
            }
            return report.into_result();
        }

        for item in items {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let outcome = invoke(item.compute);
            self.commit_outcome(&mut report, item.target, item.inputs, outcome)
                .await;
        }
        report.into_result()
    }

    async fn commit_outcome(&self, report: &mut BatchReport, target: String, inputs: Inputs, outcome: Outcome) {
        let committed = match outcome {
            Ok(object) => self
                .add(object, &format!("{}: {target}", report.stage()))
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e),
        };
        match committed {
            Ok(version) => {
                debug!(target = %target, version, "stage result committed");
                report.committed.push(VersionRef::new(target, version));
            }
            Err(e) => report.fail(target, inputs, e),
        }
    }
}
