//! Labels and goto

use zym_core::testutil::{compile_errors, run_capture};

#[test]
fn test_backward_goto_loops() {
    let source = r"
var i = 0
top:
i += 1
if (i < 5) goto top
print(i)
";
    assert_eq!(run_capture(source).unwrap(), vec!["5"]);
}

#[test]
fn test_forward_goto_skips_statements() {
    let source = r#"
goto skip
print("skipped")
skip:
print("reached")
"#;
    assert_eq!(run_capture(source).unwrap(), vec!["reached"]);
}

#[test]
fn test_goto_out_of_nested_blocks() {
    let source = r"
func find(xs, target) {
    var i = 0
    scan:
    if (i >= len(xs)) goto missing
    if (xs[i] == target) {
        return i
    }
    i += 1
    goto scan
    missing:
    return -1
}
print(find([4, 5, 6], 6), find([4, 5, 6], 7))
";
    assert_eq!(run_capture(source).unwrap(), vec!["2 -1"]);
}

#[test]
fn test_goto_out_of_loop() {
    let source = r"
func firstPair(limit) {
    for (var a = 1; a < limit; a += 1) {
        for (var b = 1; b < limit; b += 1) {
            if (a * b == 12 and a < b) goto found
        }
    }
    return null
    found:
    return 12
}
print(firstPair(10), firstPair(3))
";
    assert_eq!(run_capture(source).unwrap(), vec!["12 null"]);
}

#[test]
fn test_backward_goto_gives_fresh_captures() {
    let source = r"
func make() {
    var fns = []
    var i = 0
    again:
    if (i < 3) {
        var j = i
        push(fns, func() { return j })
        i += 1
        goto again
    }
    return fns
}
var fs = make()
print(fs[0](), fs[1](), fs[2]())
";
    assert_eq!(run_capture(source).unwrap(), vec!["0 1 2"]);
}

#[test]
fn test_redeclared_local_after_label_is_rebound() {
    let source = r"
func make() {
    var fns = []
    var i = 0
    again:
    var j = i * 10
    push(fns, func() { return j })
    i += 1
    if (i < 3) goto again
    return fns
}
var fs = make()
print(fs[0](), fs[1](), fs[2]())
";
    assert_eq!(run_capture(source).unwrap(), vec!["0 10 20"]);
}

#[test]
fn test_goto_over_declaration_is_rejected() {
    let errors = compile_errors(
        "func f() {\n    goto after\n    var x = 1\n    after:\n    return x\n}",
    )
    .unwrap();
    assert_eq!(
        errors,
        vec!["[test] line 2: goto 'after' jumps over the declaration of 'x'"]
    );
}

#[test]
fn test_goto_into_block_is_rejected() {
    let errors = compile_errors(
        "func g() {\n    goto inner\n    {\n        inner:\n        return 1\n    }\n}",
    )
    .unwrap();
    assert_eq!(
        errors,
        vec!["[test] line 2: goto 'inner' jumps into a block that does not enclose it"]
    );
}

#[test]
fn test_goto_into_sibling_block_is_rejected() {
    let errors = compile_errors(
        "func g() {\n    {\n        goto other\n    }\n    {\n        other:\n        return 1\n    }\n\
         }",
    )
    .unwrap();
    assert_eq!(
        errors,
        vec!["[test] line 3: goto 'other' jumps into a block that does not enclose it"]
    );
}

#[test]
fn test_label_errors() {
    let errors = compile_errors("goto nowhere\nhere:\nhere:").unwrap();
    assert_eq!(
        errors,
        vec![
            "[test] line 3: label 'here' is already defined in this function",
            "[test] line 1: undefined label 'nowhere'",
        ]
    );
}
