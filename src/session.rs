// ABOUTME: Host-facing request/response protocol and session lifecycle

use crate::error::{EvlError, ReaderErrorKind};
use crate::eval::{AbortFlag, Strategy};
use crate::intern;
use crate::primitives;
use crate::reader::Reader;
use crate::value::Value;
use crate::xmlconv;
use serde::{Deserialize, Serialize};

/// A source file shipped with INITIALIZE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvlFile {
    pub name: String,
    pub source: String,
}

/// One request on the single host channel. The abort buffer travels out
/// of band: it is shared storage, not serializable payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", content = "input", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Initialize {
        #[serde(rename = "selectedEvaluator")]
        selected_evaluator: String,
        #[serde(rename = "evlFiles", default)]
        evl_files: Vec<EvlFile>,
    },
    EvaluateFirstForm(String),
    EvaluateAllForms(String),
    ConvertEvlToXml(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Error,
    Aborted,
    FoundNoForm,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Output {
    Values(Vec<String>),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Output>,
}

impl Response {
    fn success(id: u64, output: Output) -> Response {
        Response {
            id,
            status: Status::Success,
            output: Some(output),
        }
    }

    fn failure(id: u64, error: &EvlError) -> Response {
        let status = match error {
            EvlError::Aborted => Status::Aborted,
            _ => Status::Error,
        };
        Response {
            id,
            status,
            output: Some(Output::Text(format!("{}: {}", error.kind_name(), error))),
        }
    }

    fn no_form(id: u64) -> Response {
        Response {
            id,
            status: Status::FoundNoForm,
            output: None,
        }
    }
}

/// One evaluator session: a selected strategy and the shared abort byte.
/// INITIALIZE tears down all interned state of any previous session.
pub struct Session {
    strategy: Strategy,
    abort: AbortFlag,
}

impl Session {
    pub fn initialize(
        strategy: Strategy,
        files: &[EvlFile],
        abort: AbortFlag,
    ) -> (Session, Result<Vec<String>, EvlError>) {
        log::debug!(
            "initializing the {} evaluator with {} source files",
            strategy.id(),
            files.len()
        );
        intern::reset();
        primitives::register();
        intern::install_features(strategy.id());
        let session = Session { strategy, abort };
        let mut last = Vec::new();
        let mut result = Ok(());
        for file in files {
            result = session.eval_source(&file.source, &mut last);
            if let Err(e) = &result {
                log::debug!("loading {} failed: {}", file.name, e);
                break;
            }
        }
        let outcome = result.map(|_| last);
        (session, outcome)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    /// Reads and evaluates every form of the source in order, recording
    /// the stringified values of the most recent evaluation. Objects
    /// embedded in XML elements evaluate through the reader callback.
    fn eval_source(&self, source: &str, last: &mut Vec<String>) -> Result<(), EvlError> {
        let mut reader = Reader::new(source);
        loop {
            let strategy = self.strategy;
            let abort = self.abort.clone();
            let next = {
                let mut embedded = |object: Value| -> Result<(), EvlError> {
                    *last = stringify(strategy.evaluate(&object, &abort)?.values());
                    Ok(())
                };
                reader.read(&mut embedded)?
            };
            match next {
                None => return Ok(()),
                Some(form) => {
                    *last = stringify(self.strategy.evaluate(&form, &self.abort)?.values());
                }
            }
        }
    }

    /// Evaluates every form; the output is the values of the last
    /// evaluation (empty when the source holds no forms).
    pub fn evaluate_all_forms(&self, source: &str) -> Result<Vec<String>, EvlError> {
        let mut last = Vec::new();
        self.eval_source(source, &mut last)?;
        Ok(last)
    }

    /// Evaluates the first form only. `Ok(None)` means the source holds
    /// no complete form (empty, whitespace-only, or truncated input).
    pub fn evaluate_first_form(&self, source: &str) -> Result<Option<Vec<String>>, EvlError> {
        let mut reader = Reader::new(source);
        let strategy = self.strategy;
        let abort = self.abort.clone();
        let mut last: Option<Vec<String>> = None;
        let read = {
            let mut embedded = |object: Value| -> Result<(), EvlError> {
                last = Some(stringify(strategy.evaluate(&object, &abort)?.values()));
                Ok(())
            };
            reader.read(&mut embedded)
        };
        match read {
            Ok(Some(form)) => Ok(Some(stringify(
                self.strategy.evaluate(&form, &self.abort)?.values(),
            ))),
            Ok(None) => Ok(last),
            Err(EvlError::Truncated(_)) => Ok(None),
            Err(EvlError::Reader(ReaderErrorKind::UnexpectedEndOfInput)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn convert_evl_to_xml(&self, source: &str) -> Result<String, EvlError> {
        xmlconv::convert(source, &self.abort)
    }
}

fn stringify(values: Vec<Value>) -> Vec<String> {
    values.iter().map(|v| format!("{}", v)).collect()
}

/// Dispatches one protocol request against the session slot, replacing
/// the session on INITIALIZE. Requests are handled one at a time.
pub fn respond(session: &mut Option<Session>, request: Request, abort: AbortFlag) -> Response {
    let id = request.id;
    match request.action {
        Action::Initialize {
            selected_evaluator,
            evl_files,
        } => {
            let Some(strategy) = Strategy::from_id(&selected_evaluator) else {
                return Response {
                    id,
                    status: Status::Error,
                    output: Some(Output::Text(format!(
                        "unknown evaluator {}",
                        selected_evaluator
                    ))),
                };
            };
            let (fresh, result) = Session::initialize(strategy, &evl_files, abort);
            *session = Some(fresh);
            match result {
                Ok(values) => Response::success(id, Output::Values(values)),
                Err(e) => Response::failure(id, &e),
            }
        }
        Action::EvaluateFirstForm(source) => match current(session, id) {
            Err(response) => response,
            Ok(s) => match s.evaluate_first_form(&source) {
                Ok(Some(values)) => Response::success(id, Output::Values(values)),
                Ok(None) => Response::no_form(id),
                Err(e) => Response::failure(id, &e),
            },
        },
        Action::EvaluateAllForms(source) => match current(session, id) {
            Err(response) => response,
            Ok(s) => match s.evaluate_all_forms(&source) {
                Ok(values) => Response::success(id, Output::Values(values)),
                Err(e) => Response::failure(id, &e),
            },
        },
        Action::ConvertEvlToXml(source) => match current(session, id) {
            Err(response) => response,
            Ok(s) => match s.convert_evl_to_xml(&source) {
                Ok(xml) => Response::success(id, Output::Text(xml)),
                Err(e) => Response::failure(id, &e),
            },
        },
    }
}

fn current<'a>(session: &'a mut Option<Session>, id: u64) -> Result<&'a Session, Response> {
    match session {
        Some(s) => Ok(s),
        None => Err(Response {
            id,
            status: Status::Error,
            output: Some(Output::Text("no evaluator session is initialized".into())),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(strategy: Strategy) -> Session {
        let (session, result) = Session::initialize(strategy, &[], AbortFlag::new());
        result.unwrap();
        session
    }

    #[test]
    fn test_evaluate_all_forms_reports_last_values() {
        let session = fresh(Strategy::TrampolinePp);
        assert_eq!(
            session.evaluate_all_forms("(_+ 1 2) (_+ 2 3)").unwrap(),
            vec!["5"]
        );
        assert_eq!(
            session.evaluate_all_forms("(_values 1 2)").unwrap(),
            vec!["1", "2"]
        );
        assert!(session.evaluate_all_forms("").unwrap().is_empty());
    }

    #[test]
    fn test_evaluate_first_form_maps_partial_input() {
        let session = fresh(Strategy::Trampoline);
        assert_eq!(
            session.evaluate_first_form("(_+ 1 2) (_error \"never\")").unwrap(),
            Some(vec!["3".to_string()])
        );
        assert_eq!(session.evaluate_first_form("( 1 2").unwrap(), None);
        assert_eq!(session.evaluate_first_form("   ").unwrap(), None);
        assert_eq!(session.evaluate_first_form("\"abc").unwrap(), None);
    }

    #[test]
    fn test_initialize_loads_files_in_order() {
        let files = vec![
            EvlFile {
                name: "lib.evl".into(),
                source: "(fset! double (_vlambda (n) (_* n 2)))".into(),
            },
            EvlFile {
                name: "main.evl".into(),
                source: "(double 21)".into(),
            },
        ];
        let (_, result) = Session::initialize(Strategy::Cps, &files, AbortFlag::new());
        assert_eq!(result.unwrap(), vec!["42"]);
    }

    #[test]
    fn test_initialize_installs_features() {
        let session = fresh(Strategy::StackOoCps);
        assert_eq!(
            session.evaluate_all_forms("(vref *features*)").unwrap(),
            vec!["(sboocps)"]
        );
    }

    #[test]
    fn test_embedded_objects_evaluate_during_read() {
        let session = fresh(Strategy::PlainRecursive);
        let source = "<chapter>(vset! x 5)</chapter> (vref x)";
        assert_eq!(session.evaluate_all_forms(source).unwrap(), vec!["5"]);
    }

    #[test]
    fn test_request_serialization_shape() {
        let request = Request {
            id: 7,
            action: Action::EvaluateAllForms("(_+ 1 2)".into()),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"action\":\"EVALUATE_ALL_FORMS\""));
        assert!(json.contains("\"input\":\"(_+ 1 2)\""));
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 7);
    }

    #[test]
    fn test_respond_round_trip() {
        let mut slot = None;
        let abort = AbortFlag::new();
        let init = Request {
            id: 1,
            action: Action::Initialize {
                selected_evaluator: "trampolinepp".into(),
                evl_files: vec![],
            },
        };
        let response = respond(&mut slot, init, abort.clone());
        assert_eq!(response.status, Status::Success);

        let eval = Request {
            id: 2,
            action: Action::EvaluateAllForms("(_+ 20 22)".into()),
        };
        let response = respond(&mut slot, eval, abort.clone());
        assert_eq!(response.status, Status::Success);
        match response.output {
            Some(Output::Values(values)) => assert_eq!(values, vec!["42"]),
            _ => panic!("expected values output"),
        }

        let broken = Request {
            id: 3,
            action: Action::EvaluateAllForms("(if 0 1 2)".into()),
        };
        let response = respond(&mut slot, broken, abort);
        assert_eq!(response.status, Status::Error);
        match response.output {
            Some(Output::Text(text)) => assert!(text.contains("EvaluatorError")),
            _ => panic!("expected an error message"),
        }
    }
}
