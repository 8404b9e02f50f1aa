use crate::catalog::Catalog;
use crate::config::{CheckClean, Options};
use crate::connect;
use crate::describe::Describer;
use crate::error::{Error, GitError};
use crate::extract::{self, FileFilter, QueryRecord, SourceFile};
use crate::git;
use crate::infer::InferenceEngine;
use crate::log::{CONFIG, WRITE};
use crate::shape::{self, DescribedQuery, NamedShape};
use crate::write::{self, WriteOutcome};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// Files read, planned and written at the same time
const FILE_CONCURRENCY: usize = 8;

/// A file with its generated shapes and the queries that could not be generated
type Planned = (SourceFile, Vec<NamedShape>, Vec<QueryRecord>);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryFailure {
    pub file: PathBuf,
    pub line: usize,
    pub sql: String,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileFailure {
    pub file: PathBuf,
    pub error: String,
}

/// What a run did. Failures here were skipped, the run itself completed.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GenerateReport {
    pub files_scanned: usize,
    pub files_changed: usize,
    pub files_unchanged: usize,
    pub queries_found: usize,
    pub queries_generated: usize,
    pub changed: Vec<PathBuf>,
    pub query_failures: Vec<QueryFailure>,
    pub file_failures: Vec<FileFailure>,
}

impl GenerateReport {
    pub fn has_failures(&self) -> bool {
        !self.query_failures.is_empty() || !self.file_failures.is_empty()
    }
}

impl Display for GenerateReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Scanned {} files: {} changed, {} unchanged, {} failed. {} of {} queries generated, {} failed.",
            self.files_scanned,
            self.files_changed,
            self.files_unchanged,
            self.file_failures.len(),
            self.queries_generated,
            self.queries_found,
            self.query_failures.len(),
        )
    }
}

///
/// One generation run over a source tree.
///
/// Per-file and per-query failures are recorded in the report and the run carries on.
/// Anything fatal fires the cancellation token so outstanding database work stops.
///
pub struct Generator {
    options: Options,
    cancel: CancellationToken,
}

impl Generator {
    pub fn new(options: Options) -> Self {
        Generator {
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling the returned token stops the run at the next opportunity
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<GenerateReport, Error> {
        let result = self.generate().await;

        if let Err(err) = &result {
            if err.is_fatal() {
                self.cancel.cancel();
            }
        }

        result
    }

    async fn generate(&self) -> Result<GenerateReport, Error> {
        let options = &self.options;
        let mut report = GenerateReport::default();

        self.check_clean(CheckClean::BeforeMigrate).await?;

        let filter = FileFilter::new(&options.include, &options.exclude)?;

        let only = match &options.since {
            Some(rev) => Some(git::changed_since(&options.root_dir, rev).await?),
            None => None,
        };

        let root = options.root_dir.clone();
        let paths =
            task::spawn_blocking(move || extract::discover(&root, &filter, only.as_ref())).await?;

        let sources = self.extract(paths, &mut report).await?;
        report.queries_found = sources.iter().map(|s| s.queries.len()).sum();

        let planned = if report.queries_found == 0 {
            // Still written, so generated blocks left without queries are removed
            info!(target: CONFIG, msg = "No queries found", files = report.files_scanned);
            sources
                .into_iter()
                .map(|source| (source, vec![], vec![]))
                .collect()
        } else {
            self.infer(sources, &mut report).await?
        };

        self.write(planned, &mut report).await?;

        self.check_clean(CheckClean::After).await?;

        info!(target: CONFIG, msg = "Generation complete", summary = %report);
        Ok(report)
    }

    /// Describes and infers every query, connecting to the database to do so
    async fn infer(
        &self,
        sources: Vec<SourceFile>,
        report: &mut GenerateReport,
    ) -> Result<Vec<Planned>, Error> {
        let options = &self.options;

        self.ensure_running()?;

        let client = connect::database(&options.database).await?;
        let catalog = Catalog::load(&client, options.database.statement_timeout()).await?;

        let describer = Describer::new(
            &client,
            options.database.statement_timeout(),
            options.database.describe_concurrency,
            self.cancel.clone(),
        );
        let descriptions = describer
            .describe_all(
                sources
                    .iter()
                    .flat_map(|s| s.queries.iter().map(|q| q.raw_sql.as_str())),
            )
            .await;

        self.ensure_running()?;

        let engine = InferenceEngine::new(&catalog, options);
        let mut planned: Vec<Planned> = vec![];

        for source in sources {
            let mut described = vec![];
            let mut failed = vec![];

            for record in &source.queries {
                let result = match descriptions.get(&record.raw_sql) {
                    Some(Ok(description)) => engine
                        .infer(&record.raw_sql, description)
                        .map_err(|err| err.to_string()),
                    Some(Err(err)) => Err(err.to_string()),
                    None => Err(Error::Cancelled.to_string()),
                };

                match result {
                    Ok(inferred) => {
                        for warning in &inferred.warnings {
                            options.logger.warn(&format!(
                                "{}:{}: {warning}",
                                record.file.display(),
                                record.line
                            ));
                        }
                        described.push(DescribedQuery {
                            record: record.clone(),
                            inferred,
                        });
                    }
                    Err(err) => {
                        options.logger.error(&format!(
                            "{}:{}: {err}\n{}",
                            record.file.display(),
                            record.line,
                            record.raw_sql
                        ));
                        report.query_failures.push(QueryFailure {
                            file: record.file.clone(),
                            line: record.line,
                            sql: record.raw_sql.clone(),
                            error: err,
                        });
                        failed.push(record.clone());
                    }
                }
            }

            report.queries_generated += described.len();
            let shapes = shape::group(described);
            planned.push((source, shapes, failed));
        }

        Ok(planned)
    }

    async fn extract(
        &self,
        paths: Vec<PathBuf>,
        report: &mut GenerateReport,
    ) -> Result<Vec<SourceFile>, Error> {
        report.files_scanned = paths.len();

        let extracted: Vec<_> = stream::iter(paths)
            .map(|path| {
                task::spawn_blocking(move || {
                    let result = extract::extract_file(&path);
                    (path, result)
                })
            })
            .buffered(FILE_CONCURRENCY)
            .collect()
            .await;

        let mut sources = vec![];
        for joined in extracted {
            let (path, result) = joined?;
            match result {
                Ok(source) => sources.push(source),
                Err(err) => {
                    self.options
                        .logger
                        .warn(&format!("Skipping {}: {err}", path.display()));
                    report.file_failures.push(FileFailure {
                        file: path,
                        error: err.to_string(),
                    });
                }
            }
        }

        Ok(sources)
    }

    async fn write(
        &self,
        planned: Vec<Planned>,
        report: &mut GenerateReport,
    ) -> Result<(), Error> {
        let default_type = self.options.default_type.clone();

        let written: Vec<_> = stream::iter(planned)
            .map(|(source, shapes, failed)| {
                let default_type = default_type.clone();
                task::spawn_blocking(move || {
                    let result = write::plan(&source, &shapes, &failed, &default_type)
                        .and_then(|planned| {
                            let Some(planned) = planned else {
                                return Ok(None);
                            };
                            let outcome = write::write_atomic(&planned)?;
                            Ok(Some((planned.path, outcome)))
                        });
                    (source.path, result)
                })
            })
            .buffered(FILE_CONCURRENCY)
            .collect()
            .await;

        for joined in written {
            let (path, result) = joined?;
            match result {
                Ok(Some((target, WriteOutcome::Written))) => {
                    debug!(target: WRITE, msg = "Updated", path = ?target);
                    report.files_changed += 1;
                    report.changed.push(target);
                }
                Ok(Some((_, WriteOutcome::Unchanged))) | Ok(None) => report.files_unchanged += 1,
                Err(err) => {
                    self.options
                        .logger
                        .error(&format!("Could not write {}: {err}", path.display()));
                    report.file_failures.push(FileFailure {
                        file: path,
                        error: err.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    async fn check_clean(&self, point: CheckClean) -> Result<(), GitError> {
        if !self.options.should_check_clean(point) {
            return Ok(());
        }
        git::check_clean(&self.options.root_dir, point).await
    }

    fn ensure_running(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

pub async fn generate(options: Options) -> Result<GenerateReport, Error> {
    Generator::new(options).run().await
}
