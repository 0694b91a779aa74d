use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use panc::{Compiler, CompilerOptions, DeprecationLevel, PanError};

struct Workspace {
    _dir: tempfile::TempDir,
    tpl: Utf8PathBuf,
    out: Utf8PathBuf,
    ann: Utf8PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let tpl = root.join("tpl");
        let out = root.join("out");
        let ann = root.join("ann");
        for d in [&tpl, &out, &ann] {
            fs::create_dir_all(d).unwrap();
        }
        Workspace {
            _dir: dir,
            tpl,
            out,
            ann,
        }
    }

    fn template(&self, name: &str, text: &str) -> Utf8PathBuf {
        let file = self.tpl.join(format!("{name}.pan"));
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, text).unwrap();
        file
    }

    fn options(&self, formats: &str) -> CompilerOptions {
        CompilerOptions::builder()
            .include_dir(&self.tpl)
            .output_dir(&self.out)
            .formats(formats)
            .threads(2)
            .build()
            .unwrap()
    }

    fn read(&self, file: &str) -> String {
        fs::read_to_string(self.out.join(file)).unwrap()
    }
}

#[test]
fn test_object_outputs() {
    let ws = Workspace::new();
    ws.template(
        "site/base",
        "template site/base;\n'/system/os' = 'linux';\n'/system/packages' = list('vim', 'git');\n",
    );
    let node = ws.template(
        "node1",
        "object template node1;\ninclude 'site/base';\n'/hardware/cpus' = 4;\n",
    );

    let options = CompilerOptions::builder()
        .include_dir(&ws.tpl)
        .output_dir(&ws.out)
        .formats("json,xml,text,dep")
        .annotations(&ws.ann, &ws.tpl)
        .build()
        .unwrap();
    let results = Compiler::run(options, &[], &[node]).unwrap();
    assert!(!results.has_errors(), "{}", results.format_errors());

    let json = ws.read("node1.json");
    assert!(json.contains("\"cpus\": 4"));
    assert!(json.contains("\"os\": \"linux\""));

    let xml = ws.read("node1.xml");
    assert!(xml.contains(r#"<nlist format="pan" name="profile">"#));
    assert!(xml.contains(r#"<long name="cpus">4</long>"#));

    let text = ws.read("node1.txt");
    assert!(text.contains("+-profile"));

    let deps = ws.read("node1.xml.dep");
    assert!(deps.lines().any(|l| l.starts_with("node1 PAN file://")));
    assert!(deps.lines().any(|l| l.starts_with("site/base PAN file://")));

    assert!(ws.ann.join("node1.pan.annotation.xml").exists());
    assert!(ws.ann.join("site/base.pan.annotation.xml").exists());

    assert_eq!(results.stats.file_count, 1);
    assert_eq!(results.stats.finished(panc::engine::ResultType::Build), 1);
}

#[test]
fn test_external_reference() {
    let ws = Workspace::new();
    ws.template("node1", "object template node1;\n'/hardware/cpus' = 8;\n");
    let node2 = ws.template(
        "node2",
        "object template node2;\n'/peer/cpus' = value('node1:/hardware/cpus');\n",
    );

    let results = Compiler::run(ws.options("json,dep"), &[], &[node2]).unwrap();
    assert!(!results.has_errors(), "{}", results.format_errors());

    assert!(ws.read("node2.json").contains("\"cpus\": 8"));
    // Referenced objects are built but not written.
    assert!(!ws.out.join("node1.json").exists());
    // Their templates count as dependencies.
    assert!(
        ws.read("node2.xml.dep")
            .lines()
            .any(|l| l.starts_with("node1 PAN"))
    );
}

#[test]
fn test_object_cycle_is_reported() {
    let ws = Workspace::new();
    let a = ws.template("a", "object template a;\n'/x' = value('b:/x');\n");
    let b = ws.template("b", "object template b;\n'/x' = value('a:/x');\n");

    let results = Compiler::run(ws.options("json"), &[], &[a, b]).unwrap();
    assert!(results.has_errors());
    assert!(
        results
            .format_errors()
            .contains("circular object dependency")
    );
    assert!(!ws.out.join("a.json").exists());
    assert!(!ws.out.join("b.json").exists());
}

#[test]
fn test_errors_do_not_stop_other_objects() {
    let ws = Workspace::new();
    let good = ws.template("good", "object template good;\n'/a' = 1;\n");
    let broken = ws.template("broken", "object template broken;\n'/a' = ;\n");
    let invalid = ws.template(
        "invalid",
        "object template invalid;\n'/a' = 1;\nbind '/a' = string;\n",
    );

    let results = Compiler::run(ws.options("json"), &[], &[good, broken, invalid]).unwrap();
    assert_eq!(results.errors.len(), 2, "{}", results.format_errors());
    assert!(results.errors.iter().any(|e| matches!(e, PanError::Syntax { .. })));
    assert!(results.errors.iter().any(PanError::is_validation));

    assert!(ws.out.join("good.json").exists());
    assert!(!ws.out.join("invalid.json").exists());
}

#[test]
fn test_final_paths_and_limits() {
    let ws = Workspace::new();
    let locked = ws.template(
        "locked",
        "object template locked;\nfinal '/a' = 1;\n'/a' = 2;\n",
    );
    let looping = ws.template(
        "looping",
        "object template looping;\n'/x' = { i = 0; while (true) { i = i + 1; }; i; };\n",
    );

    let options = CompilerOptions::builder()
        .include_dir(&ws.tpl)
        .output_dir(&ws.out)
        .formats("json")
        .max_iteration(100)
        .build()
        .unwrap();
    let results = Compiler::run(options, &[], &[locked, looping]).unwrap();
    let errors = results.format_errors();
    assert!(errors.contains("is marked as final"), "{errors}");
    assert!(errors.contains("iteration limit (100) exceeded"), "{errors}");
}

#[test]
fn test_syntax_check_writes_nothing() {
    let ws = Workspace::new();
    let ok = ws.template("ok", "object template ok;\n'/a' = 1;\n");
    let bad = ws.template("bad", "template bad\n");

    let results = Compiler::run(
        CompilerOptions::check_syntax(DeprecationLevel::Off),
        &[],
        &[ok, bad],
    )
    .unwrap();
    assert_eq!(results.errors.len(), 1);
    assert!(fs::read_dir(&ws.out).unwrap().next().is_none());
}

#[test]
fn test_object_names_are_resolved() {
    let ws = Workspace::new();
    ws.template("site/node", "object template site/node;\n'/a' = 1;\n");

    let compiler = Compiler::new(ws.options("json"), &["site/node".to_string()], &[]).unwrap();
    assert_eq!(
        compiler.files().iter().collect::<Vec<_>>(),
        [&ws.tpl.join("site/node.pan")]
    );
    let results = compiler.process().unwrap();
    assert!(!results.has_errors(), "{}", results.format_errors());
    assert!(Utf8Path::new(&ws.out.join("site/node.json")).exists());

    assert!(Compiler::new(ws.options("json"), &["missing".to_string()], &[]).is_err());
}

#[test]
fn test_annotation_only_run() {
    let ws = Workspace::new();
    let node = ws.template(
        "site/node",
        "#@ Site node\nobject template site/node;\n#@ Core count\n'/cpus' = 2;\n",
    );

    let options = CompilerOptions::builder()
        .include_dir(&ws.tpl)
        .annotations(&ws.ann, &ws.tpl)
        .build()
        .unwrap();
    let results = Compiler::run(options, &[], &[node]).unwrap();
    assert!(!results.has_errors(), "{}", results.format_errors());

    let xml = fs::read_to_string(ws.ann.join("site/node.pan.annotation.xml")).unwrap();
    assert!(xml.contains("<desc>Site node</desc>"), "{xml}");
    assert!(xml.contains(r#"<assign line="4" name="/cpus">"#), "{xml}");
    assert!(fs::read_dir(&ws.out).unwrap().next().is_none());
}
