//! Compile-command rewriting.
//!
//! A recognized compile step (one C/C++ source, one `.o` target) is split
//! into a local preprocess command and a remote compile command, with the
//! intermediate paths bound under the staging root. Anything else is a
//! bypass: the invocation runs locally, untouched.
//!
//! The flag surgery is regex-over-token and deliberately conservative:
//! `-I` strips both the fused `-Iinclude` form and the bare `-I dir` pair,
//! and the bare `-D`/`-I`/`-M` patterns match anywhere in a token. Stripping
//! too much from the remote command is harmless, because the translation
//! unit is already fully preprocessed when it leaves the local machine.

use std::sync::LazyLock;

use regex::Regex;

use swarm_common::args::ArgList;
use swarm_common::config::STAGING_ROOT;
use swarm_common::errors::Result;

/// C/C++ source file extensions.
static SOURCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\.c$)|(\.cpp$)|(\.cc$)").expect("source pattern"));

/// Object file extension.
static OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.o$").expect("object pattern"));

/// Flags the local preprocessor toolchain does not accept.
static UNSUPPORTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("ftrivial").expect("unsupported-flag pattern"));

/// Preprocessor flags that carry a following value token.
static PREPROCESSOR_PAIRS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\-MT)|(\-MF)|(\-include)|(\-I$)").expect("pair pattern"));

/// Single-token preprocessor flags.
static PREPROCESSOR_FLAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\-D)|(\-I)|(\-M)").expect("flag pattern"));

/// A rewritten compile step: the two commands plus the path bindings the
/// orchestrator moves files along.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    /// Local command producing the preprocessed translation unit.
    pub preprocess: ArgList,
    /// Command executed on the selected remote host.
    pub compile: ArgList,
    /// Where the caller expects the object file.
    pub local_object: String,
    /// Where the remote compile writes the object file.
    pub remote_object: String,
    /// Local staging path of the preprocessed unit.
    pub local_preprocessed: String,
    /// Remote staging path the unit is uploaded to.
    pub remote_preprocessed: String,
}

/// Outcome of rewriting an invocation.
#[derive(Debug)]
pub enum Rewrite {
    /// A distributable compile step.
    Remote(Box<BuildPlan>),
    /// Not a recognizable compile step; run the sanitized original locally.
    Bypass(ArgList),
}

/// Split `args` into the preprocess/compile pair, or signal a bypass.
/// `local_host` names the per-client staging directory on the remote side.
pub fn rewrite(mut args: ArgList, local_host: &str) -> Result<Rewrite> {
    // Flags the local toolchain would reject are dropped from everything,
    // the bypass path included.
    args.delete_matching(&UNSUPPORTED, 1);

    let source = match args.first_matching(&SOURCE, 0)? {
        Some(source) => source.to_string(),
        None => return Ok(Rewrite::Bypass(args)),
    };
    let local_object = match args.first_matching(&OBJECT, 0)? {
        Some(object) => object.to_string(),
        None => return Ok(Rewrite::Bypass(args)),
    };

    let local_preprocessed = format!("{STAGING_ROOT}/{source}");
    let remote_base = format!("{STAGING_ROOT}/{local_host}");
    let remote_object = format!("{remote_base}/{local_object}");
    let remote_preprocessed = format!("{remote_base}/{source}");

    let mut preprocess = args.clone();
    preprocess.substitute_matching(&OBJECT, &local_preprocessed, 0)?;
    preprocess.push("-E");

    let mut compile = args;
    compile.delete_matching(&PREPROCESSOR_PAIRS, 2);
    compile.delete_matching(&PREPROCESSOR_FLAGS, 1);
    compile.substitute_matching(&OBJECT, &remote_object, 0)?;
    compile.substitute_matching(&SOURCE, &remote_preprocessed, 0)?;

    Ok(Rewrite::Remote(Box::new(BuildPlan {
        preprocess,
        compile,
        local_object,
        remote_object,
        local_preprocessed,
        remote_preprocessed,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tokens: &[&str]) -> ArgList {
        let mut argv = vec!["swarm-cc".to_string()];
        argv.extend(tokens.iter().map(|t| t.to_string()));
        ArgList::from_argv(argv).expect("valid argv")
    }

    fn plan(tokens: &[&str]) -> BuildPlan {
        match rewrite(args(tokens), "devbox").expect("rewrite") {
            Rewrite::Remote(plan) => *plan,
            Rewrite::Bypass(_) => panic!("expected a remote plan"),
        }
    }

    #[test]
    fn invocation_without_source_bypasses() {
        let out = rewrite(args(&["cc", "--version"]), "devbox").unwrap();
        assert!(matches!(out, Rewrite::Bypass(_)));
    }

    #[test]
    fn invocation_without_object_bypasses() {
        let out = rewrite(args(&["cc", "-E", "foo.c"]), "devbox").unwrap();
        assert!(matches!(out, Rewrite::Bypass(_)));
    }

    #[test]
    fn linking_step_bypasses() {
        let out = rewrite(args(&["cc", "foo.o", "bar.o", "-o", "app"]), "devbox").unwrap();
        // There are .o tokens but no source file.
        assert!(matches!(out, Rewrite::Bypass(_)));
    }

    #[test]
    fn standard_compile_is_split() {
        let plan = plan(&["cc", "-O2", "-c", "foo.c", "-o", "out/foo.o"]);

        assert_eq!(plan.local_object, "out/foo.o");
        assert_eq!(plan.local_preprocessed, "/tmp/swarm/foo.c");
        assert_eq!(plan.remote_preprocessed, "/tmp/swarm/devbox/foo.c");
        assert_eq!(plan.remote_object, "/tmp/swarm/devbox/out/foo.o");

        assert_eq!(
            plan.preprocess.tokens(),
            ["cc", "-O2", "-c", "foo.c", "-o", "/tmp/swarm/foo.c", "-E"]
        );
        assert_eq!(
            plan.compile.tokens(),
            [
                "cc",
                "-O2",
                "-c",
                "/tmp/swarm/devbox/foo.c",
                "-o",
                "/tmp/swarm/devbox/out/foo.o"
            ]
        );
    }

    #[test]
    fn cpp_and_cc_extensions_are_recognized() {
        let plan1 = plan(&["g++", "-c", "widget.cpp", "-o", "widget.o"]);
        assert_eq!(plan1.remote_preprocessed, "/tmp/swarm/devbox/widget.cpp");

        let plan2 = plan(&["g++", "-c", "gadget.cc", "-o", "gadget.o"]);
        assert_eq!(plan2.remote_preprocessed, "/tmp/swarm/devbox/gadget.cc");
    }

    #[test]
    fn dependency_generation_flags_stay_local_only() {
        let plan = plan(&[
            "cc", "-MT", "foo.d", "-MF", "foo.dep", "-Iinclude", "-DDEBUG", "-include",
            "prolog.h", "-c", "foo.c", "-o", "foo.o",
        ]);

        // The preprocess command keeps every preprocessor concern.
        for tok in ["-MT", "foo.d", "-MF", "foo.dep", "-Iinclude", "-DDEBUG", "-include", "prolog.h"] {
            assert!(
                plan.preprocess.tokens().iter().any(|t| t == tok),
                "preprocess lost {tok}"
            );
        }

        // The remote command keeps none of them.
        for tok in plan.compile.tokens() {
            assert!(!tok.starts_with("-M"), "remote kept {tok}");
            assert!(!tok.starts_with("-D"), "remote kept {tok}");
            assert!(!tok.starts_with("-I"), "remote kept {tok}");
            assert_ne!(tok, "-include");
            assert_ne!(tok, "foo.d");
            assert_ne!(tok, "foo.dep");
            assert_ne!(tok, "prolog.h");
        }
    }

    #[test]
    fn bare_include_dir_pair_is_stripped() {
        // `-I dir` as two tokens: the pair rule takes the directory with it.
        let plan = plan(&["cc", "-I", "include", "-c", "foo.c", "-o", "foo.o"]);
        assert!(!plan.compile.tokens().iter().any(|t| t == "-I"));
        assert!(!plan.compile.tokens().iter().any(|t| t == "include"));
    }

    #[test]
    fn unsupported_flag_is_dropped_everywhere() {
        let plan = plan(&[
            "cc",
            "-ftrivial-auto-var-init=zero",
            "-c",
            "foo.c",
            "-o",
            "foo.o",
        ]);
        assert!(!plan.preprocess.tokens().iter().any(|t| t.contains("ftrivial")));
        assert!(!plan.compile.tokens().iter().any(|t| t.contains("ftrivial")));

        // Bypassed invocations are sanitized too.
        match rewrite(args(&["cc", "-ftrivial-auto-var-init=zero", "--version"]), "devbox").unwrap()
        {
            Rewrite::Bypass(rest) => assert_eq!(rest.tokens(), ["cc", "--version"]),
            Rewrite::Remote(_) => panic!("expected bypass"),
        }
    }

    #[test]
    fn exactly_one_remote_source_and_object_binding() {
        let plan = plan(&["cc", "-O2", "-c", "src/foo.c", "-o", "out/foo.o"]);
        let source_hits = plan
            .compile
            .tokens()
            .iter()
            .filter(|t| *t == &plan.remote_preprocessed)
            .count();
        let object_hits = plan
            .compile
            .tokens()
            .iter()
            .filter(|t| *t == &plan.remote_object)
            .count();
        assert_eq!(source_hits, 1);
        assert_eq!(object_hits, 1);
    }

    #[test]
    fn nested_source_path_keeps_its_directories() {
        let plan = plan(&["cc", "-c", "src/core/foo.c", "-o", "build/foo.o"]);
        assert_eq!(plan.local_preprocessed, "/tmp/swarm/src/core/foo.c");
        assert_eq!(plan.remote_preprocessed, "/tmp/swarm/devbox/src/core/foo.c");
        assert_eq!(plan.remote_object, "/tmp/swarm/devbox/build/foo.o");
    }
}
