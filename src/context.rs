// src/context.rs
// 流水线上下文：滤波 → 特征数据集 → 划分 → 模型选择，各阶段结果显式保存在这里
use crate::config::PipelineConfig;
use crate::dataset::{BuildReport, Dataset, DatasetBuilder};
use crate::error::{PipelineError, TrialError};
use crate::metrics::{evaluate, Evaluation};
use crate::ml::{SelectionResult, Selector};
use crate::signal::{FilterStage, Trial};
use crate::split::Split;

/// Everything one run produced, owned in one place and handed to callers.
#[derive(Clone, Debug)]
pub struct PipelineContext {
    pub config: PipelineConfig,
    /// Trials dropped by the filter stage.
    pub filter_failures: Vec<TrialError>,
    pub dataset: Dataset,
    pub build_report: BuildReport,
    pub split: Split,
    pub selection: SelectionResult,
}

impl PipelineContext {
    pub fn run(config: PipelineConfig, trials: &[Trial]) -> Result<Self, PipelineError> {
        config.validate()?;
        if trials.is_empty() {
            return Err(PipelineError::EmptyInput("trial list"));
        }
        log::info!("pipeline v{}: {} trials", config.version, trials.len());

        let batch = FilterStage::new(&config.filter)?.filter_all(trials);
        let (dataset, build_report) = DatasetBuilder::new(&config.features).build(&batch.signals)?;
        log::info!(
            "dataset: {} rows, {} excluded, {} ignored",
            dataset.len(),
            build_report.excluded.len(),
            build_report.ignored.len()
        );

        let split = Split::new(&dataset, &config.split.policy())?;
        let selection = Selector::new(&config.trainer).run(&split)?;
        Ok(Self {
            config,
            filter_failures: batch.failures,
            dataset,
            build_report,
            split,
            selection,
        })
    }

    /// Every per-trial failure of the run, filtering first.
    pub fn trial_failures(&self) -> impl Iterator<Item = &TrialError> {
        self.filter_failures
            .iter()
            .chain(self.build_report.excluded.iter())
    }

    /// Metrics of the winning family's predictions on the test partition.
    pub fn evaluate_winner(&self) -> Result<Evaluation, PipelineError> {
        let winner = self
            .selection
            .winner_result()
            .ok_or(PipelineError::EmptyInput("selection result"))?;
        evaluate(&self.split.test.labels, &winner.predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SplitPolicyKind, SvmGrid, TreeGrid};
    use crate::ml::svm::Kernel;
    use crate::signal::{drain, SyntheticSource};
    use crate::types::SubjectKey;

    fn quick_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.trainer.decision_tree = Some(TreeGrid {
            max_depth: vec![Some(3)],
            min_samples_split: vec![2],
            min_samples_leaf: vec![1],
            ..TreeGrid::default()
        });
        config.trainer.svm = Some(SvmGrid {
            c: vec![1.0],
            kernel: vec![Kernel::Linear],
            ..SvmGrid::default()
        });
        config.trainer.neural_network = None;
        config
    }

    #[test]
    fn synthetic_run_threads_every_stage() {
        let mut trials = drain(&mut SyntheticSource::new(10, 600, 3)).unwrap();
        trials.push(Trial::new("S11", 13, vec![0.1; 20], 500.0));

        let ctx = PipelineContext::run(quick_config(), &trials).unwrap();
        assert_eq!(ctx.filter_failures.len(), 1);
        assert!(matches!(ctx.filter_failures[0], TrialError::TrialTooShort { .. }));
        assert_eq!(ctx.dataset.len(), 20);
        assert_eq!(ctx.split.train.len() + ctx.split.test.len(), 20);
        assert_eq!(ctx.selection.results.len(), 2);

        let eval = ctx.evaluate_winner().unwrap();
        assert_eq!(eval.confusion.total(), ctx.split.test.len());
        assert!((0.0..=1.0).contains(&eval.accuracy));
        assert_eq!(ctx.trial_failures().count(), 1);
    }

    #[test]
    fn manual_split_with_unknown_subject_aborts() {
        let trials = drain(&mut SyntheticSource::new(4, 400, 1)).unwrap();
        let mut config = quick_config();
        config.split.policy = SplitPolicyKind::Manual;
        config.split.manual_test_subjects = vec!["99".into()];
        match PipelineContext::run(config, &trials) {
            Err(PipelineError::UnknownSubjectsInManualSplit { subjects }) => {
                assert_eq!(subjects, vec![SubjectKey::Id(99)])
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn empty_trial_list_is_rejected() {
        assert!(matches!(
            PipelineContext::run(quick_config(), &[]),
            Err(PipelineError::EmptyInput(_))
        ));
    }
}
