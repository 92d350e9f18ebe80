//! Per-worker analysis session.
//!
//! An [`AnalysisSession`] owns everything a worker needs to serve requests:
//! the installed linter, the file stores, the program registry and the
//! parser/rule engine seams. It is never shared between workers.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::config::{AnalysisConfiguration, FileType, LinterConfig};
use crate::embedded::{EmbeddedScript, extract_scripts, extract_yaml_lambdas};
use crate::error::AnalysisError;
use crate::language::{Language, LanguageClassifier};
use crate::memory::log_memory_usage;
use crate::metrics::{self, MetricsOptions};
use crate::parser::{ScanParser, SourceParser};
use crate::program::{AnalysisProgram, ProgramRegistry, ProjectManifest};
use crate::request::{
    AnalysisRequest, AnalysisResponse, FileAnalysisOutput, FileInput, FileResult,
    IncrementalResult, Perf, ProgramInfo, ProjectAnalysisInput, ProjectAnalysisOutput,
    TsConfigFilesOutput,
};
use crate::rules::{NoopRuleEngine, RuleContext, RuleEngine};
use crate::store::{
    DiscoveryContext, FileStoreRegistry, PackageJsonStore, SourceFileStore, TsConfigStore,
    write_tsconfig,
};

const LINTER_MISSING: &str = "Linter does not exist. Call init-linter first";

/// Receives per-file results of a project analysis as they are produced.
pub type ResultSink<'a> = &'a mut dyn FnMut(IncrementalResult);

/// Process-level switches shared by every session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Parse JavaScript files with the TypeScript grammar.
    pub ts_parser_for_js: bool,
    /// IDE mode: only `nosonarLines` metrics are computed.
    pub lightweight: bool,
    /// Log resident memory around program construction.
    pub debug_memory: bool,
    /// Rule bundles loaded with every linter.
    pub rule_bundles: Vec<PathBuf>,
}

/// Which analysis a file request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Script,
    Style,
    Markup,
    Yaml,
}

/// A file ready to be analyzed.
struct SourceUnit<'a> {
    path: &'a Path,
    content: &'a str,
    language: Language,
    file_type: FileType,
    ignore_header_comments: bool,
    ts_parser_for_js: bool,
    program: Option<Arc<AnalysisProgram>>,
}

/// Analysis state of one worker.
pub struct AnalysisSession {
    options: SessionOptions,
    parser: Box<dyn SourceParser>,
    engine: Box<dyn RuleEngine>,
    linter: Option<LinterConfig>,
    loaded_bundles: HashSet<PathBuf>,
    classifier: LanguageClassifier,
    programs: ProgramRegistry,
    stores: FileStoreRegistry,
    last_configuration: Option<AnalysisConfiguration>,
    /// Tsconfigs found by the last project discovery.
    project_tsconfigs: Vec<PathBuf>,
    temp_tsconfigs: Vec<TempPath>,
}

impl AnalysisSession {
    /// Creates a session with the default parser and rule engine.
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            parser: Box::new(ScanParser),
            engine: Box::new(NoopRuleEngine::new()),
            linter: None,
            loaded_bundles: HashSet::new(),
            classifier: LanguageClassifier::default(),
            programs: ProgramRegistry::new(),
            stores: FileStoreRegistry::with_default_stores(),
            last_configuration: None,
            project_tsconfigs: Vec::new(),
            temp_tsconfigs: Vec::new(),
        }
    }

    pub fn with_parser(mut self, parser: Box<dyn SourceParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_rule_engine(mut self, engine: Box<dyn RuleEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn linter(&self) -> Option<&LinterConfig> {
        self.linter.as_ref()
    }

    pub fn programs(&self) -> &ProgramRegistry {
        &self.programs
    }

    pub fn stores(&self) -> &FileStoreRegistry {
        &self.stores
    }

    /// Serves one request.
    ///
    /// Project analyses deliver their per-file results to `sink` when one is
    /// given, and return an output with an empty `files` map.
    pub fn handle(
        &mut self,
        request: AnalysisRequest,
        sink: Option<ResultSink<'_>>,
    ) -> Result<AnalysisResponse, AnalysisError> {
        debug!("Handling {} request", request.kind());
        match request {
            AnalysisRequest::InitLinter(config) => {
                self.init_linter(config)?;
                Ok(AnalysisResponse::ack())
            }
            AnalysisRequest::AnalyzeJsTs(input) => {
                self.analyze_file(input, FileKind::Script).map(AnalysisResponse::File)
            }
            AnalysisRequest::AnalyzeCss(input) => {
                self.analyze_file(input, FileKind::Style).map(AnalysisResponse::File)
            }
            AnalysisRequest::AnalyzeHtml(input) => {
                self.analyze_file(input, FileKind::Markup).map(AnalysisResponse::File)
            }
            AnalysisRequest::AnalyzeYaml(input) => {
                self.analyze_file(input, FileKind::Yaml).map(AnalysisResponse::File)
            }
            AnalysisRequest::AnalyzeProject(input) => {
                self.analyze_project(input, sink).map(AnalysisResponse::Project)
            }
            AnalysisRequest::CreateProgram(input) => {
                self.create_program(&input.ts_config).map(AnalysisResponse::Program)
            }
            AnalysisRequest::DeleteProgram(input) => {
                self.delete_program(&input.program_id);
                Ok(AnalysisResponse::ack())
            }
            AnalysisRequest::TsConfigFiles(input) => self
                .tsconfig_files(&input.ts_config)
                .map(AnalysisResponse::TsConfigFiles),
            AnalysisRequest::NewTsConfig => {
                self.clear_programs();
                Ok(AnalysisResponse::ack())
            }
            AnalysisRequest::CreateTsConfigFile(tsconfig) => {
                let filename = self.create_tsconfig_file(&tsconfig)?;
                Ok(AnalysisResponse::TsConfigFile { filename })
            }
        }
    }

    /// Installs the rule configuration, loading any new rule bundle.
    pub fn init_linter(&mut self, config: LinterConfig) -> Result<(), AnalysisError> {
        config.validate()?;
        let bundles: Vec<PathBuf> = self
            .options
            .rule_bundles
            .iter()
            .chain(config.bundles.iter())
            .filter(|bundle| !self.loaded_bundles.contains(*bundle))
            .cloned()
            .collect();
        for bundle in bundles {
            self.engine.load_bundle(&bundle)?;
            self.loaded_bundles.insert(bundle);
        }

        info!(
            "Linter initialized for {} with {} rules",
            config.base_dir.display(),
            config.rules.len()
        );
        self.linter = Some(config);
        Ok(())
    }

    /// Analyzes a single file.
    fn analyze_file(
        &mut self,
        mut input: FileInput,
        kind: FileKind,
    ) -> Result<FileAnalysisOutput, AnalysisError> {
        if self.linter.is_none() {
            return Err(AnalysisError::linter(LINTER_MISSING));
        }

        let content = match input.file_content.take() {
            Some(content) => content,
            None => read_file(&input.file_path)?,
        };
        let language = match input.language {
            Some(language) => language,
            None => self.language_for(&input.file_path, &content, kind),
        };

        let program = match kind {
            FileKind::Script => self.program_for(&input)?,
            _ => None,
        };

        let unit = SourceUnit {
            path: &input.file_path,
            content: &content,
            language,
            file_type: input.file_type,
            ignore_header_comments: input.ignore_header_comments,
            ts_parser_for_js: self.options.ts_parser_for_js,
            program,
        };
        self.analyze_unit(&unit)
    }

    fn language_for(&self, path: &Path, content: &str, kind: FileKind) -> Language {
        let detected = self.classifier.classify(path, Some(content));
        match (kind, detected) {
            (FileKind::Script, Some(language)) if language.is_script() => language,
            (FileKind::Script, _) => Language::Js,
            (FileKind::Style, _) => Language::Css,
            (FileKind::Markup, _) => Language::Html,
            (FileKind::Yaml, _) => Language::Yaml,
        }
    }

    /// Program used for a script file: explicit id, then listed tsconfigs,
    /// then any cached program containing the file.
    fn program_for(
        &mut self,
        input: &FileInput,
    ) -> Result<Option<Arc<AnalysisProgram>>, AnalysisError> {
        if let Some(id) = &input.program_id {
            return self
                .programs
                .get_by_id(id)
                .map(Some)
                .ok_or_else(|| AnalysisError::program(format!("Failed to find program {}", id)));
        }

        let file = canonical(&input.file_path);
        for tsconfig in &input.ts_configs {
            let handle = self.programs.get_or_create(tsconfig, &self.classifier)?;
            if handle.created && self.options.debug_memory {
                log_memory_usage("after program creation");
            }
            if handle.program.contains(&file) {
                return Ok(Some(handle.program));
            }
        }
        Ok(self.programs.find_program_for_file(&file))
    }

    fn analyze_unit(&self, unit: &SourceUnit<'_>) -> Result<FileAnalysisOutput, AnalysisError> {
        match unit.language {
            Language::Html => {
                let scripts = extract_scripts(unit.content);
                self.analyze_embedded(unit, scripts)
            }
            Language::Yaml => {
                let scripts = extract_yaml_lambdas(unit.content);
                self.analyze_embedded(unit, scripts)
            }
            _ if is_vue(unit.path) => {
                let scripts = extract_scripts(unit.content);
                self.analyze_embedded(unit, scripts)
            }
            _ => self.analyze_source(unit),
        }
    }

    fn analyze_source(&self, unit: &SourceUnit<'_>) -> Result<FileAnalysisOutput, AnalysisError> {
        let Some(linter) = self.linter.as_ref() else {
            return Err(AnalysisError::linter(LINTER_MISSING));
        };

        let parse_language = if unit.language == Language::Js && unit.ts_parser_for_js {
            Language::Ts
        } else {
            unit.language
        };

        let parse_start = Instant::now();
        let parsed = self.parser.parse(unit.content, parse_language)?;
        let parse_time = parse_start.elapsed().as_millis() as u64;

        let rules = linter.rules_for(unit.file_type, unit.language);
        let dependencies = self.dependencies_for(unit.path);
        let ctx = RuleContext {
            file: unit.path,
            source: unit.content,
            parsed: &parsed,
            language: unit.language,
            file_type: unit.file_type,
            rules: &rules,
            dependencies: &dependencies,
            program: unit.program.as_deref(),
            environments: &linter.environments,
            globals: &linter.globals,
        };

        let analysis_start = Instant::now();
        let issues = self.engine.evaluate(&ctx)?;
        let analysis_time = analysis_start.elapsed().as_millis() as u64;

        let metrics = metrics::compute(
            &parsed,
            MetricsOptions {
                lightweight: self.options.lightweight || linter.sonarlint,
                ignore_header_comments: unit.ignore_header_comments,
            },
        );

        Ok(FileAnalysisOutput {
            issues,
            metrics,
            program_id: unit.program.as_ref().map(|p| p.id.clone()),
            perf: Perf {
                parse_time,
                analysis_time,
            },
        })
    }

    /// Analyzes scripts embedded in a markup or YAML file.
    ///
    /// Issue and error lines are reported relative to the enclosing file.
    fn analyze_embedded(
        &self,
        unit: &SourceUnit<'_>,
        scripts: Vec<EmbeddedScript>,
    ) -> Result<FileAnalysisOutput, AnalysisError> {
        let mut output = FileAnalysisOutput::default();

        for script in scripts {
            let snippet = SourceUnit {
                path: unit.path,
                content: &script.code,
                language: script.language,
                file_type: unit.file_type,
                ignore_header_comments: false,
                ts_parser_for_js: unit.ts_parser_for_js,
                program: None,
            };
            let result = self
                .analyze_source(&snippet)
                .map_err(|e| shift_error(e, script.line_offset))?;

            output.issues.extend(
                result
                    .issues
                    .into_iter()
                    .map(|issue| issue.shifted(script.line_offset)),
            );
            output.metrics.nosonar_lines.extend(
                result
                    .metrics
                    .nosonar_lines
                    .into_iter()
                    .map(|line| line + script.line_offset),
            );
            output.perf.parse_time += result.perf.parse_time;
            output.perf.analysis_time += result.perf.analysis_time;
        }
        Ok(output)
    }

    fn dependencies_for(&self, file: &Path) -> BTreeSet<String> {
        self.stores
            .store::<PackageJsonStore>()
            .map(|store| store.dependencies_for(file))
            .unwrap_or_default()
    }

    /// Discovers and analyzes a whole project.
    pub fn analyze_project(
        &mut self,
        input: ProjectAnalysisInput,
        mut sink: Option<ResultSink<'_>>,
    ) -> Result<ProjectAnalysisOutput, AnalysisError> {
        let ProjectAnalysisInput {
            configuration,
            files,
            rules,
            bundles,
        } = input;
        let base_dir = configuration.require_base_dir()?.to_path_buf();

        if !rules.is_empty() {
            let mut linter = LinterConfig::new(&base_dir);
            linter.rules = rules;
            linter.environments = configuration.environments.clone();
            linter.globals = configuration.globals.clone();
            linter.sonarlint = configuration.sonarlint;
            linter.bundles = bundles;
            self.init_linter(linter)?;
        }
        if self.linter.is_none() {
            return Err(AnalysisError::linter(LINTER_MISSING));
        }

        self.classifier = LanguageClassifier::from_config(&configuration);
        let ctx = DiscoveryContext::new(&base_dir, &configuration).with_input_files(files.as_ref());
        self.stores.discover(&ctx)?;

        let mut output = ProjectAnalysisOutput::default();
        let tsconfigs = self
            .stores
            .store::<TsConfigStore>()
            .map(|store| store.tsconfigs().map(<[PathBuf]>::to_vec))
            .transpose()?
            .unwrap_or_default();
        for event in &configuration.fs_events {
            self.programs.invalidate_containing(event.path());
        }
        let previous = std::mem::replace(&mut self.project_tsconfigs, tsconfigs.clone());
        for stale in previous.iter().filter(|old| !tsconfigs.contains(old)) {
            self.programs.invalidate(stale);
        }
        for tsconfig in &tsconfigs {
            match self.programs.get_or_create(tsconfig, &self.classifier) {
                Ok(handle) => {
                    if handle.created && self.options.debug_memory {
                        log_memory_usage("after program creation");
                    }
                    output.meta.programs_created.push(tsconfig.clone());
                }
                Err(e) => {
                    warn!("Failed to create program for {}: {}", tsconfig.display(), e);
                    output
                        .meta
                        .warnings
                        .push(format!("Failed to create program for {}: {}", tsconfig.display(), e));
                }
            }
        }

        let records = match self.stores.store::<SourceFileStore>() {
            Some(store) => store.files().records()?.cloned().collect::<Vec<_>>(),
            None => Vec::new(),
        };
        info!(
            "Analyzing {} files of {}",
            records.len(),
            base_dir.display()
        );

        let max_size = configuration.max_file_size_bytes();
        let ts_parser_for_js =
            self.options.ts_parser_for_js || configuration.allow_ts_parser_js_files;
        for record in records {
            let content = match record.content {
                Some(content) => content,
                None => match read_file_bounded(&record.path, max_size) {
                    Ok(Some(content)) => content,
                    Ok(None) => {
                        let warning = format!(
                            "Skipped {}: larger than {} KB",
                            record.path.display(),
                            configuration.max_file_size
                        );
                        warn!("{}", warning);
                        output.meta.warnings.push(warning);
                        continue;
                    }
                    Err(e) => {
                        let result = FileResult::Failed(e.to_payload());
                        self.deliver(&mut output, &mut sink, record.path, result);
                        continue;
                    }
                },
            };

            let language = match record.language {
                Language::Js => self
                    .classifier
                    .classify(&record.path, Some(&content))
                    .unwrap_or(Language::Js),
                other => other,
            };
            let program = if language.is_script() {
                self.programs.find_program_for_file(&canonical(&record.path))
            } else {
                None
            };
            let unit = SourceUnit {
                path: &record.path,
                content: &content,
                language,
                file_type: record.file_type,
                ignore_header_comments: configuration.ignore_header_comments,
                ts_parser_for_js,
                program,
            };

            let result = match self.analyze_unit(&unit) {
                Ok(file) => FileResult::Analyzed(file),
                Err(e) if e.is_per_file() => {
                    debug!("Analysis of {} failed: {}", record.path.display(), e);
                    FileResult::Failed(e.to_payload())
                }
                Err(e) => return Err(e),
            };
            self.deliver(&mut output, &mut sink, record.path, result);
        }

        self.last_configuration = Some(configuration);
        Ok(output)
    }

    fn deliver(
        &self,
        output: &mut ProjectAnalysisOutput,
        sink: &mut Option<ResultSink<'_>>,
        filename: PathBuf,
        result: FileResult,
    ) {
        output.meta.files_analyzed.push(filename.clone());
        match sink {
            Some(sink) => (*sink)(IncrementalResult { filename, result }),
            None => {
                output.files.insert(filename, result);
            }
        }
    }

    /// Builds (or reuses) the program of `tsconfig`.
    pub fn create_program(&mut self, tsconfig: &Path) -> Result<ProgramInfo, AnalysisError> {
        let handle = self.programs.get_or_create(tsconfig, &self.classifier)?;
        if handle.created && self.options.debug_memory {
            log_memory_usage("after program creation");
        }
        Ok(ProgramInfo {
            program_id: handle.id,
            files: handle.program.files(),
            project_references: handle.program.manifest.project_references.clone(),
            missing_ts_config: handle.program.manifest.missing,
        })
    }

    /// Drops a cached program. Unknown ids are ignored.
    pub fn delete_program(&mut self, id: &str) -> bool {
        let deleted = self.programs.delete(id);
        if deleted && self.options.debug_memory {
            log_memory_usage("after program deletion");
        }
        deleted
    }

    /// Root files and references of a tsconfig, without caching a program.
    pub fn tsconfig_files(&self, tsconfig: &Path) -> Result<TsConfigFilesOutput, AnalysisError> {
        let manifest = ProjectManifest::resolve(tsconfig, &self.classifier)?;
        Ok(TsConfigFilesOutput {
            files: manifest.root_files,
            project_references: manifest.project_references,
        })
    }

    /// Drops every cached program.
    pub fn clear_programs(&mut self) {
        let count = self.programs.len();
        self.programs.clear();
        info!("Cleared {} cached programs", count);
        if self.options.debug_memory {
            log_memory_usage("after clearing programs");
        }
    }

    /// Writes a temporary tsconfig that lives as long as the session.
    pub fn create_tsconfig_file(&mut self, tsconfig: &Value) -> Result<PathBuf, AnalysisError> {
        if !tsconfig.is_object() {
            return Err(AnalysisError::validation("tsconfig must be a JSON object"));
        }
        let path = write_tsconfig(tsconfig)?;
        let filename = path.to_path_buf();
        self.temp_tsconfigs.push(path);
        Ok(filename)
    }

    /// Releases programs, discovered files and temporary tsconfigs.
    pub fn close(&mut self) {
        self.programs.clear();
        self.project_tsconfigs.clear();
        if let Some(configuration) = self.last_configuration.take()
            && let Some(base_dir) = configuration.base_dir.as_deref()
        {
            let ctx = DiscoveryContext::new(base_dir, &configuration);
            if let Err(e) = self.stores.clear(&ctx) {
                warn!("Failed to clear file stores: {}", e);
            }
        }
        self.temp_tsconfigs.clear();
        debug!("Analysis session closed");
    }
}

impl Default for AnalysisSession {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

fn read_file(path: &Path) -> Result<String, AnalysisError> {
    fs::read_to_string(path).map_err(|e| {
        AnalysisError::Io(std::io::Error::new(
            e.kind(),
            format!("Cannot read {}: {}", path.display(), e),
        ))
    })
}

/// Reads a file unless it exceeds `max_bytes`.
fn read_file_bounded(path: &Path, max_bytes: u64) -> Result<Option<String>, AnalysisError> {
    let size = fs::metadata(path)?.len();
    if max_bytes > 0 && size > max_bytes {
        return Ok(None);
    }
    read_file(path).map(Some)
}

fn is_vue(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("vue"))
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn shift_error(error: AnalysisError, offset: u32) -> AnalysisError {
    match error {
        AnalysisError::Parsing {
            message,
            line,
            code,
        } => AnalysisError::Parsing {
            message,
            line: line.map(|l| l + offset),
            code,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FsEvent, FsEventKind, RuleConfig};
    use crate::error::{ErrorCode, ErrorPayload};
    use crate::request::{Issue, Metrics, ProjectFileInput};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Reports one issue on the first line containing `debugger`.
    struct DebuggerRule;

    impl RuleEngine for DebuggerRule {
        fn load_bundle(&mut self, _bundle: &Path) -> Result<(), AnalysisError> {
            Ok(())
        }

        fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<Vec<Issue>, AnalysisError> {
            if ctx.rules.iter().all(|rule| rule.key != "no-debugger") {
                return Ok(Vec::new());
            }
            Ok(ctx
                .source
                .lines()
                .enumerate()
                .filter(|(_, line)| line.contains("debugger"))
                .map(|(i, _)| Issue::new("no-debugger", i as u32 + 1, 0, "Remove debugger"))
                .collect())
        }
    }

    fn session(dir: &Path) -> AnalysisSession {
        let mut session =
            AnalysisSession::new(SessionOptions::default()).with_rule_engine(Box::new(DebuggerRule));
        let mut linter = LinterConfig::new(dir);
        linter.rules.push(RuleConfig::new("no-debugger"));
        session.init_linter(linter).unwrap();
        session
    }

    #[test]
    fn test_requires_linter() {
        let mut session = AnalysisSession::default();
        let request = AnalysisRequest::AnalyzeJsTs(FileInput::new("/a.js").with_content("a();"));
        let err = session.handle(request, None).unwrap_err();
        assert!(matches!(err, AnalysisError::LinterInitialization(_)));
        match err.to_payload() {
            ErrorPayload::Parsing { parsing_error } => {
                assert_eq!(parsing_error.code, ErrorCode::LinterInitialization)
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_analyze_js_with_metrics() {
        let temp = TempDir::new().unwrap();
        let mut session = session(temp.path());
        let input = FileInput::new(temp.path().join("a.js"))
            .with_content("// NOSONAR header\nlet a = 1;\ndebugger;\n");
        let AnalysisResponse::File(output) = session
            .handle(AnalysisRequest::AnalyzeJsTs(input), None)
            .unwrap()
        else {
            panic!("expected a file output");
        };

        assert_eq!(output.issues, vec![Issue::new("no-debugger", 3, 0, "Remove debugger")]);
        assert_eq!(output.metrics.nosonar_lines, vec![1]);
        assert_eq!(output.metrics.ncloc, Some(vec![2, 3]));
        assert_eq!(output.program_id, None);
    }

    #[test]
    fn test_reads_content_lazily() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("b.js");
        fs::write(&file, "debugger;\n").unwrap();
        let mut session = session(temp.path());
        let output = session.analyze_file(FileInput::new(&file), FileKind::Script).unwrap();
        assert_eq!(output.issues.len(), 1);

        let err = session
            .analyze_file(FileInput::new(temp.path().join("missing.js")), FileKind::Script)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Io(_)));
    }

    #[test]
    fn test_parsing_error() {
        let temp = TempDir::new().unwrap();
        let mut session = session(temp.path());
        let input = FileInput::new(temp.path().join("c.js")).with_content("function f() {\n");
        let err = session.analyze_file(input, FileKind::Script).unwrap_err();
        assert!(matches!(err, AnalysisError::Parsing { line: Some(1), .. }));
    }

    #[test]
    fn test_html_issue_lines_are_shifted() {
        let temp = TempDir::new().unwrap();
        let mut session = session(temp.path());
        let html = "<html>\n<body>\n<script>\nlet a;\ndebugger;\n</script>\n</body>\n</html>\n";
        let input = FileInput::new(temp.path().join("index.html")).with_content(html);
        let output = session.analyze_file(input, FileKind::Markup).unwrap();
        assert_eq!(output.issues.len(), 1);
        assert_eq!(output.issues[0].line, 5);
    }

    #[test]
    fn test_lightweight_metrics() {
        let temp = TempDir::new().unwrap();
        let mut session = AnalysisSession::new(SessionOptions {
            lightweight: true,
            ..SessionOptions::default()
        });
        session.init_linter(LinterConfig::new(temp.path())).unwrap();
        let input = FileInput::new(temp.path().join("a.css")).with_content("a { color: red; }\n");
        let output = session.analyze_file(input, FileKind::Style).unwrap();
        assert_eq!(output.metrics, Metrics::default());
    }

    #[test]
    fn test_program_lifecycle() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("tsconfig.json"), r#"{"include": ["src"]}"#).unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/a.ts"), "debugger;\n").unwrap();
        let mut session = session(temp.path());

        let info = session.create_program(&temp.path().join("tsconfig.json")).unwrap();
        assert_eq!(info.files.len(), 1);
        assert!(!info.missing_ts_config);

        let mut input = FileInput::new(temp.path().join("src/a.ts"));
        input.program_id = Some(info.program_id.clone());
        let output = session.analyze_file(input, FileKind::Script).unwrap();
        let program = session.programs().get_by_id(&info.program_id).unwrap();
        assert_eq!(output.program_id, Some(program.id.clone()));

        assert!(session.delete_program(&info.program_id));
        let mut input = FileInput::new(temp.path().join("src/a.ts"));
        input.program_id = Some(info.program_id.clone());
        let err = session.analyze_file(input, FileKind::Script).unwrap_err();
        assert!(matches!(err, AnalysisError::ProgramConstruction(_)));
    }

    #[test]
    fn test_missing_tsconfig_program() {
        let temp = TempDir::new().unwrap();
        let mut session = session(temp.path());
        let info = session.create_program(&temp.path().join("nope/tsconfig.json")).unwrap();
        assert!(info.missing_ts_config);
        assert!(info.files.is_empty());
    }

    #[test]
    fn test_project_analysis_recovers_per_file_errors() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/good.js"), "debugger;\n").unwrap();
        fs::write(temp.path().join("src/bad.js"), "if (a) {\n").unwrap();
        fs::write(temp.path().join("src/notes.txt"), "ignored").unwrap();
        let mut session = session(temp.path());

        let input = ProjectAnalysisInput {
            configuration: AnalysisConfiguration::for_base_dir(temp.path()),
            ..ProjectAnalysisInput::default()
        };
        let output = session.analyze_project(input, None).unwrap();

        assert_eq!(output.files.len(), 2);
        assert!(output.files[&temp.path().join("src/bad.js")].is_failed());
        match &output.files[&temp.path().join("src/good.js")] {
            FileResult::Analyzed(file) => assert_eq!(file.issues.len(), 1),
            other => panic!("unexpected result {:?}", other),
        }
        // No tsconfig in the project: a fallback program is built.
        assert_eq!(output.meta.programs_created.len(), 1);
        assert_eq!(output.meta.files_analyzed.len(), 2);
    }

    #[test]
    fn test_rediscovered_fallback_replaces_its_program() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/a.js"), "debugger;\n").unwrap();
        let mut session = session(temp.path());
        let mut configuration = AnalysisConfiguration::for_base_dir(temp.path());

        let mut previous: Option<PathBuf> = None;
        for round in 0..3 {
            let created = temp.path().join(format!("src/new{}.js", round));
            fs::write(&created, "debugger;\n").unwrap();
            configuration.fs_events = vec![FsEvent(created.clone(), FsEventKind::Created)];
            let input = ProjectAnalysisInput {
                configuration: configuration.clone(),
                ..ProjectAnalysisInput::default()
            };
            let output = session.analyze_project(input, None).unwrap();

            let fallback = output.meta.programs_created[0].clone();
            assert_ne!(previous.as_ref(), Some(&fallback));
            assert_eq!(session.programs().len(), 1);
            assert!(session.programs().find_program_for_file(&canonical(&created)).is_some());
            previous = Some(fallback);
        }
    }

    #[test]
    fn test_project_analysis_streams_results() {
        let temp = TempDir::new().unwrap();
        let mut files = BTreeMap::new();
        for name in ["a.js", "b.js", "c.css"] {
            files.insert(
                temp.path().join(name),
                ProjectFileInput {
                    file_content: Some("debugger;\n".to_string()),
                    ..Default::default()
                },
            );
        }
        let mut session = session(temp.path());
        let input = ProjectAnalysisInput {
            configuration: AnalysisConfiguration::for_base_dir(temp.path()),
            files: Some(files),
            ..ProjectAnalysisInput::default()
        };

        let mut streamed = Vec::new();
        let mut on_result = |result: IncrementalResult| streamed.push(result.filename);
        let sink: ResultSink<'_> = &mut on_result;
        let output = session.analyze_project(input, Some(sink)).unwrap();

        assert!(output.files.is_empty());
        assert_eq!(
            streamed,
            vec![
                temp.path().join("a.js"),
                temp.path().join("b.js"),
                temp.path().join("c.css"),
            ]
        );
        assert_eq!(output.meta.files_analyzed, streamed);
    }

    #[test]
    fn test_create_tsconfig_file_lives_with_session() {
        let mut session = AnalysisSession::default();
        let path = session
            .create_tsconfig_file(&serde_json::json!({"files": ["/a.ts"]}))
            .unwrap();
        assert!(path.exists());
        session.close();
        assert!(!path.exists());

        let err = session.create_tsconfig_file(&serde_json::json!([1])).unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
    }
}
