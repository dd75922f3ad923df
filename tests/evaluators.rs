// ABOUTME: Cross-evaluator semantics: one corpus, six strategies, equal results

use evl::error::EvlError;
use evl::eval::{AbortFlag, Strategy};
use evl::reader::Reader;
use evl::session::{EvlFile, Session};
use evl::value::Value;

const PRELUDE: &str = "\
(fset! + (fref _+))
(fset! test-loop (_vlambda (n) (if (_= n 0) :done (test-loop (_- n 1)))))
(fset! spin-forever (_vlambda () (spin-forever)))
";

fn session(strategy: Strategy) -> Session {
    let files = vec![EvlFile {
        name: "prelude.evl".into(),
        source: PRELUDE.into(),
    }];
    let (session, result) = Session::initialize(strategy, &files, AbortFlag::new());
    result.expect("prelude must load");
    session
}

fn run(strategy: Strategy, source: &str) -> Result<Vec<String>, EvlError> {
    session(strategy).evaluate_all_forms(source)
}

/// The shared corpus: every entry must yield the same printed values
/// under all six strategies.
const CORPUS: &[(&str, &[&str])] = &[
    ("42", &["42"]),
    ("#t", &["#t"]),
    ("\"text\"", &["\"text\""]),
    (":key", &[":key"]),
    ("#v", &["#v"]),
    ("(_+ 1 2)", &["3"]),
    ("(+ 1 2)", &["3"]),
    ("(if #t 'a 'b)", &["a"]),
    ("(if #f 'a 'b)", &["b"]),
    ("(quote (1 . 2))", &["(1 . 2)"]),
    ("(progn)", &["#v"]),
    ("(progn (vset! x 1) (vset! x 2) (vref x))", &["2"]),
    ("(vset! y 3) y", &["3"]),
    ("((_vlambda (x) ((_vlambda (y) (_+ x y)) 2)) 40)", &["42"]),
    ("((_vlambda (a . r) r) 1 2 3)", &["(2 3)"]),
    ("((_vlambda args args) 1 2)", &["(1 2)"]),
    ("(fset! sq (_vlambda (n) (_* n n))) (sq 5)", &["25"]),
    (
        "(fset! k (_mlambda (x) (_list (quote quote) x))) (k abc)",
        &["abc"],
    ),
    (
        "(fset! deep (_vlambda () (dref d))) \
         (fset! with-d (_dlambda (d) (deep))) \
         (with-d 9)",
        &["9"],
    ),
    ("(_catch-errors (_error \"oops\"))", &["\"EvaluatorError\""]),
    ("(_catch-errors 42)", &["#v"]),
    ("(_catch-errors missing)", &["\"EvaluatorError\""]),
    ("(apply _list 1 2 (_list 3 4))", &["(1 2 3 4)"]),
    ("(multiple-value-call _list 1 (_values 2 3) 4)", &["(1 2 3 4)"]),
    ("(_values 1 2)", &["1", "2"]),
    ("(_values)", &[]),
    (
        "(vset! v (_vector 1 2)) (_vector-set! v 0 9) (_vector-ref v 0)",
        &["9"],
    ),
    ("(_eq? 'a 'a)", &["#t"]),
    ("(_eql? \"s\" \"s\")", &["#t"]),
    ("(_eq? \"s\" \"s\")", &["#f"]),
    ("(_cons 1 (_cons 2 (quote ())))", &["(1 2)"]),
    ("(_set-cdr! (vset! p (_cons 1 2)) (quote ())) (vref p)", &["(1)"]),
];

/// Sources that must fail under every strategy.
const ERROR_CORPUS: &[&str] = &[
    "(if 0 'a 'b)",
    "()",
    "missing",
    "(missing-function 1)",
    "(apply _+ 1 2)",
    "(_+ 1 #t)",
    "((_vlambda (x) x) 1 2)",
    "((_vlambda (x) x))",
];

#[test]
fn test_semantic_equivalence_across_all_strategies() {
    for (source, expected) in CORPUS {
        for strategy in Strategy::ALL {
            let values = run(strategy, source).unwrap_or_else(|e| {
                panic!("{} failed under {}: {}", source, strategy.id(), e)
            });
            assert_eq!(
                values,
                expected.to_vec(),
                "{} under {}",
                source,
                strategy.id()
            );
        }
    }
}

#[test]
fn test_error_equivalence_across_all_strategies() {
    for source in ERROR_CORPUS {
        for strategy in Strategy::ALL {
            assert!(
                run(strategy, source).is_err(),
                "{} should fail under {}",
                source,
                strategy.id()
            );
        }
    }
}

#[test]
fn test_if_rejects_non_boolean_with_the_expected_message() {
    for strategy in Strategy::ALL {
        let error = run(strategy, "(if 0 'a 'b)").unwrap_err();
        assert!(
            format!("{}", error).contains("test-form does not evaluate to a boolean"),
            "under {}",
            strategy.id()
        );
    }
}

#[test]
fn test_for_each_split() {
    let source = "(vset! acc (quote ())) \
                  (_for-each (_vlambda (x) (vset! acc (_cons x (vref acc)))) \
                             (_list 1 2 3)) \
                  (vref acc)";
    for strategy in [Strategy::Cps, Strategy::OoCps, Strategy::StackOoCps] {
        assert_eq!(run(strategy, source).unwrap(), vec!["(3 2 1)"]);
    }
    for strategy in [
        Strategy::PlainRecursive,
        Strategy::Trampoline,
        Strategy::TrampolinePp,
    ] {
        let error = run(strategy, source).unwrap_err();
        assert!(
            format!("{}", error).contains("not implemented"),
            "under {}",
            strategy.id()
        );
    }
}

#[test]
fn test_tail_safety_of_the_trampolines() {
    for strategy in [Strategy::Trampoline, Strategy::TrampolinePp] {
        assert_eq!(
            run(strategy, "(test-loop 1000000)").unwrap(),
            vec![":done"],
            "under {}",
            strategy.id()
        );
    }
}

#[test]
fn test_operand_order_is_left_to_right() {
    let source = "(vset! trace (quote ())) \
                  (fset! note (_vlambda (x) (progn (vset! trace (_cons x (vref trace))) x))) \
                  (_list (note 1) (note 2) (note 3)) \
                  (vref trace)";
    for strategy in Strategy::ALL {
        assert_eq!(
            run(strategy, source).unwrap(),
            vec!["(3 2 1)"],
            "under {}",
            strategy.id()
        );
    }
}

#[test]
fn test_apply_spreading_matches_direct_call() {
    for strategy in Strategy::ALL {
        let spread = run(strategy, "(apply _+ (_list 1 2 3))").unwrap();
        let direct = run(strategy, "(_+ 1 2 3)").unwrap();
        assert_eq!(spread, direct, "under {}", strategy.id());
        let error = run(strategy, "(apply _+ 1)").unwrap_err();
        assert!(
            format!("{}", error).contains("malformed spreadable"),
            "under {}",
            strategy.id()
        );
    }
}

#[test]
fn test_abort_interrupts_a_diverging_evaluation() {
    for strategy in [Strategy::Trampoline, Strategy::TrampolinePp] {
        let s = session(strategy);
        let flag = s.abort_flag();
        let buffer = flag.buffer();
        let setter = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            buffer.store(1, std::sync::atomic::Ordering::Relaxed);
        });
        let result = s.evaluate_all_forms("(spin-forever)");
        setter.join().unwrap();
        match result {
            Err(EvlError::Aborted) => {}
            other => panic!("expected Aborted under {}, got {:?}", strategy.id(), other.err().map(|e| e.kind_name())),
        }
    }
}

#[test]
fn test_read_print_round_trip() {
    let sources = [
        "42", "-2.5", "#t", "#f", "#v", "()", "\"line\\nbreak\"", ":kw", "plain-name",
        "(1 (2 3) . 4)", "#(1 #t \"s\")",
    ];
    for source in sources {
        let original = Reader::new(source).read_object().unwrap().unwrap();
        let printed = format!("{}", original);
        let back = Reader::new(&printed).read_object().unwrap().unwrap();
        assert!(
            structurally_equal(&original, &back),
            "{} printed as {}",
            source,
            printed
        );
    }
}

fn structurally_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Cons(x), Value::Cons(y)) => {
            structurally_equal(&x.car.borrow(), &y.car.borrow())
                && structurally_equal(&x.cdr.borrow(), &y.cdr.borrow())
        }
        (Value::Vector(x), Value::Vector(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| structurally_equal(a, b))
        }
        _ => Value::eql(a, b),
    }
}

#[test]
fn test_interning_across_reads() {
    let a = Reader::new("spelled-once").read_object().unwrap().unwrap();
    let b = Reader::new("spelled-once").read_object().unwrap().unwrap();
    assert!(Value::eq(&a, &b));
}

#[test]
fn test_read_time_conditionals_against_features() {
    let s = session(Strategy::Trampoline);
    assert_eq!(
        s.evaluate_all_forms("#+trampoline 1 2").unwrap(),
        vec!["2"]
    );
    assert_eq!(
        s.evaluate_all_forms("(_list #+trampoline 1 2)").unwrap(),
        vec!["(1 2)"]
    );
    assert_eq!(
        s.evaluate_all_forms("(_list #-trampoline 1 2)").unwrap(),
        vec!["(2)"]
    );
    assert_eq!(
        s.evaluate_all_forms("(_list #+(or nothing trampoline) 1 2)")
            .unwrap(),
        vec!["(1 2)"]
    );
}
