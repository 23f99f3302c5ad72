// tests/cook.rs

//! Recipe executor tests: real `sh` runs inside a scratch rpmbuild tree.

mod common;

use common::{load_with_preamble, scratch_kitchen};
use spec_kitchen::features::FeatureOverrides;
use spec_kitchen::recipe::{CheckPolicy, Kitchen, Phase};
use spec_kitchen::recipe::kitchen::StaticResolver;
use spec_kitchen::{Error, ExitStatus};
use std::fs;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

const SIMPLE: &str = "\
%description
Demo package.

%prep
rm -rf demo-1.0
mkdir -p demo-1.0 && cd demo-1.0
echo 'readme' > README

%build
echo built > out.txt

%install
mkdir -p %{buildroot}/usr/bin
cp out.txt %{buildroot}%{_bindir}/demo

%files
%doc README
%{_bindir}/demo
";

// =============================================================================
// HAPPY PATH
// =============================================================================

#[test]
fn test_cook_populates_buildroot() {
    let (_tmp, config) = scratch_kitchen();
    let kitchen = Kitchen::new(config.clone());
    let d = load_with_preamble(SIMPLE);

    let result = kitchen.cook(&d, &FeatureOverrides::new()).unwrap();

    assert_eq!(result.package, "demo-1.0-1");
    assert_eq!(
        fs::read_to_string(config.buildroot.join("usr/bin/demo")).unwrap(),
        "built\n"
    );
    let phases: Vec<Phase> = result.phases.iter().map(|p| p.phase).collect();
    assert_eq!(phases, vec![Phase::Prep, Phase::Build, Phase::Install]);
    // Later phases start where %prep left off
    assert_eq!(result.phases[1].workdir, config.builddir.join("demo-1.0"));
    assert_eq!(result.manifest.matched, vec!["/usr/bin/demo"]);
    assert_eq!(result.manifest.skipped, vec!["README"]);
    assert!(result.checks_passed());
    assert!(result.warnings.is_empty());
    assert!(result.log.contains("=== %build ==="));
}

#[test]
fn test_phases_run_in_fixed_order() {
    let (_tmp, config) = scratch_kitchen();
    let kitchen = Kitchen::new(config.clone());
    let d = load_with_preamble(
        "%check\necho check >> \"$RPM_BUILD_DIR/order\"\n\n\
         %install\necho install >> \"$RPM_BUILD_DIR/order\"\n\
         mkdir -p %{buildroot}/opt/demo && touch %{buildroot}/opt/demo/marker\n\n\
         %build\necho build >> \"$RPM_BUILD_DIR/order\"\n\n\
         %prep\necho prep > \"$RPM_BUILD_DIR/order\"\n\n\
         %files\n/opt/demo\n",
    );

    kitchen.cook(&d, &FeatureOverrides::new()).unwrap();

    let order = fs::read_to_string(config.builddir.join("order")).unwrap();
    assert_eq!(order, "prep\nbuild\ninstall\ncheck\n");
}

#[test]
fn test_controlled_environment() {
    let (tmp, mut config) = scratch_kitchen();
    let setup = tmp.path().join("setup.sh");
    fs::write(&setup, "export ROS_DISTRO=noetic\n").unwrap();
    config.env_setup = Some(setup);
    config
        .env
        .insert("CUSTOM_FLAG".to_string(), "on".to_string());
    let kitchen = Kitchen::new(config.clone());

    let d = load_with_preamble(
        "%install\n\
         mkdir -p %{buildroot}/usr/share/demo\n\
         echo \"$RPM_PACKAGE_NAME-$RPM_PACKAGE_VERSION-$RPM_PACKAGE_RELEASE $ROS_DISTRO $CUSTOM_FLAG ${SHOULD_NOT_LEAK:-unset}\" > %{buildroot}/usr/share/demo/env\n\n\
         %files\n/usr/share/demo\n",
    );

    // SAFETY: no other test reads this variable
    unsafe { std::env::set_var("SHOULD_NOT_LEAK", "leaked") };
    kitchen.cook(&d, &FeatureOverrides::new()).unwrap();

    let env = fs::read_to_string(config.buildroot.join("usr/share/demo/env")).unwrap();
    assert_eq!(env, "demo-1.0-1 noetic on unset\n");
}

#[test]
fn test_setup_unpacks_source_archive() {
    if which::which("tar").is_err() {
        return;
    }
    let (_tmp, config) = scratch_kitchen();
    let staging = config.sourcedir.join("demo-1.0");
    fs::create_dir_all(&staging).unwrap();
    fs::write(staging.join("data.txt"), "payload\n").unwrap();
    let status = Command::new("tar")
        .args(["-cf", "demo-1.0.tar", "demo-1.0"])
        .current_dir(&config.sourcedir)
        .status()
        .unwrap();
    assert!(status.success());
    fs::remove_dir_all(&staging).unwrap();

    let kitchen = Kitchen::new(config.clone());
    let d = load_with_preamble(
        "Source0: demo-1.0.tar\n\n\
         %prep\n%setup -q\n\n\
         %install\ninstall -D -m 644 data.txt %{buildroot}/usr/share/demo/data.txt\n\n\
         %files\n/usr/share/demo/data.txt\n",
    );

    let result = kitchen.cook(&d, &FeatureOverrides::new()).unwrap();
    assert_eq!(result.phases[0].workdir, config.builddir.join("demo-1.0"));
    assert_eq!(
        fs::read_to_string(config.buildroot.join("usr/share/demo/data.txt")).unwrap(),
        "payload\n"
    );
}

// =============================================================================
// SHELL STATE
// =============================================================================

#[test]
fn test_variables_carry_across_commands() {
    let (_tmp, config) = scratch_kitchen();
    let kitchen = Kitchen::new(config.clone());
    let d = load_with_preamble(
        "%build\n\
         export FOO=bar\n\
         TEST_TARGET=test\n\
         echo \"[$FOO][$TEST_TARGET]\" > out\n\n\
         %install\n\
         mkdir -p %{buildroot}/opt/demo\n\
         cp out %{buildroot}/opt/demo/out\n\
         echo \"${TEST_TARGET:-unset}\" > %{buildroot}/opt/demo/install-env\n\n\
         %files\n/opt/demo\n",
    );

    kitchen.cook(&d, &FeatureOverrides::new()).unwrap();

    let out = fs::read_to_string(config.buildroot.join("opt/demo/out")).unwrap();
    assert_eq!(out, "[bar][test]\n");
    // Every phase starts from the controlled environment again
    let install_env = fs::read_to_string(config.buildroot.join("opt/demo/install-env")).unwrap();
    assert_eq!(install_env, "unset\n");
}

#[test]
fn test_sourced_script_and_test_target_pattern() {
    let (_tmp, config) = scratch_kitchen();
    let kitchen = Kitchen::new(config.clone());
    let d = load_with_preamble(
        "%build\n\
         printf 'export SOURCED_PREFIX=/opt/ros/demo\\n' > env.sh\n\
         if [ -f ./env.sh ]; then . ./env.sh; fi\n\
         echo \"$SOURCED_PREFIX\" > prefix\n\n\
         %install\n\
         mkdir -p %{buildroot}/opt/demo && cp prefix %{buildroot}/opt/demo/prefix\n\n\
         %check\n\
         TEST_TARGET=$(printf 'check\\ntest\\n' | sed -n 2p)\n\
         if [ -n \"$TEST_TARGET\" ]; then\n\
           touch \"$RPM_BUILD_DIR/ran-$TEST_TARGET\"\n\
         else echo \"RPM TESTS SKIPPED\"; fi\n\n\
         %files\n/opt/demo\n",
    );

    let result = kitchen.cook(&d, &FeatureOverrides::new()).unwrap();

    assert!(result.checks_passed());
    assert_eq!(
        fs::read_to_string(config.buildroot.join("opt/demo/prefix")).unwrap(),
        "/opt/ros/demo\n"
    );
    assert!(config.builddir.join("ran-test").exists());
}

#[test]
fn test_failed_command_does_not_update_state() {
    let (_tmp, config) = scratch_kitchen();
    let kitchen = Kitchen::new(config.clone());
    let d = load_with_preamble(
        "%install\nmkdir -p %{buildroot}/opt/demo && touch %{buildroot}/opt/demo/bin\n\n\
         %check\nX=first\nX=second; false\necho \"$X\" > \"$RPM_BUILD_DIR/x\"\n\n\
         %files\n/opt/demo\n",
    );

    let result = kitchen.cook(&d, &FeatureOverrides::new()).unwrap();

    assert_eq!(result.check_failures.len(), 1);
    assert_eq!(fs::read_to_string(config.builddir.join("x")).unwrap(), "first\n");
}

#[test]
fn test_here_document_in_install() {
    let (_tmp, config) = scratch_kitchen();
    let kitchen = Kitchen::new(config.clone());
    let d = load_with_preamble(
        "%install\n\
         mkdir -p %{buildroot}/etc\n\
         cat > %{buildroot}/etc/demo.conf <<EOF\n\
         key=value\n\
         \n\
         name=%{name}\n\
         EOF\n\n\
         %files\n/etc/demo.conf\n",
    );
    assert_eq!(d.recipe.get(Phase::Install).unwrap().commands.len(), 2);

    kitchen.cook(&d, &FeatureOverrides::new()).unwrap();

    assert_eq!(
        fs::read_to_string(config.buildroot.join("etc/demo.conf")).unwrap(),
        "key=value\n\nname=demo\n"
    );
}

// =============================================================================
// FAILURES
// =============================================================================

#[test]
fn test_unresolved_build_requires_runs_nothing() {
    let (_tmp, config) = scratch_kitchen();
    let resolver = StaticResolver::from_entries(["gcc"]).unwrap();
    let kitchen = Kitchen::with_resolver(config.clone(), Arc::new(resolver));
    let d = load_with_preamble(&format!("BuildRequires: gcc, cmake >= 3.10\n{}", SIMPLE));

    match kitchen.cook(&d, &FeatureOverrides::new()).unwrap_err() {
        Error::UnresolvedDependency { missing } => assert_eq!(missing, vec!["cmake >= 3.10"]),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!config.builddir.join("demo-1.0").exists());
}

#[test]
fn test_failing_build_stops_the_cook() {
    let (_tmp, config) = scratch_kitchen();
    let kitchen = Kitchen::new(config.clone());
    let d = load_with_preamble(
        "%build\nexit 2\ntouch \"$RPM_BUILD_DIR/after-fail\"\n\n\
         %install\ntouch \"$RPM_BUILD_DIR/installed\"\n\n%files\n/opt\n",
    );

    match kitchen.cook(&d, &FeatureOverrides::new()).unwrap_err() {
        Error::PhaseExecution {
            phase,
            command,
            status,
        } => {
            assert_eq!(phase, "build");
            assert_eq!(command, "exit 2");
            assert_eq!(status, ExitStatus::Code(2));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!config.builddir.join("after-fail").exists());
    assert!(!config.builddir.join("installed").exists());
}

#[test]
fn test_build_log_written_when_cook_fails() {
    let (tmp, mut config) = scratch_kitchen();
    let log = tmp.path().join("logs/build.log");
    config.log_file = Some(log.clone());
    let kitchen = Kitchen::new(config);
    let d = load_with_preamble("%build\necho compiling\nexit 4\n\n%files\n/opt\n");

    assert!(kitchen.cook(&d, &FeatureOverrides::new()).is_err());

    let text = fs::read_to_string(&log).unwrap();
    assert!(text.contains("=== %build ==="));
    assert!(text.contains("+ echo compiling\ncompiling\n"));
    assert!(text.contains("+ exit 4"));
}

#[test]
fn test_refuses_to_clean_home_as_buildroot() {
    let (tmp, mut config) = scratch_kitchen();
    fs::write(tmp.path().join("precious"), "keep me").unwrap();
    config.buildroot = config.home.clone();
    let kitchen = Kitchen::new(config);
    let d = load_with_preamble("%install\ntrue\n\n%files\n/opt\n");

    match kitchen.cook(&d, &FeatureOverrides::new()).unwrap_err() {
        Error::Config(message) => assert!(message.contains("refusing to clean")),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(tmp.path().join("precious").exists());
}

#[test]
fn test_timeout_kills_command() {
    let (_tmp, mut config) = scratch_kitchen();
    config.timeout = Some(Duration::from_millis(200));
    let kitchen = Kitchen::new(config);
    let d = load_with_preamble("%build\nsleep 5\n\n%files\n/opt\n");

    match kitchen.cook(&d, &FeatureOverrides::new()).unwrap_err() {
        Error::PhaseExecution { status, .. } => assert_eq!(status, ExitStatus::TimedOut),
        other => panic!("unexpected error {other:?}"),
    }
}

// =============================================================================
// CHECK POLICY
// =============================================================================

const WITH_CHECK: &str = "%bcond_without tests\n\
    %install\nmkdir -p %{buildroot}/opt/demo && touch %{buildroot}/opt/demo/bin\n\n\
    %if %{with tests}\n%check\nexit 3\ntouch \"$RPM_BUILD_DIR/after-check\"\n%endif\n\n\
    %files\n/opt/demo\n";

#[test]
fn test_check_failure_is_reported() {
    let (_tmp, config) = scratch_kitchen();
    let kitchen = Kitchen::new(config.clone());
    let d = load_with_preamble(WITH_CHECK);

    let result = kitchen.cook(&d, &FeatureOverrides::new()).unwrap();
    assert!(!result.checks_passed());
    assert_eq!(result.check_failures.len(), 1);
    assert_eq!(result.check_failures[0].command, "exit 3");
    assert_eq!(result.check_failures[0].status, ExitStatus::Code(3));
    // Remaining check commands still run
    assert!(config.builddir.join("after-check").exists());
}

#[test]
fn test_check_failure_aborts_under_abort_policy() {
    let (_tmp, mut config) = scratch_kitchen();
    config.check_policy = CheckPolicy::Abort;
    let kitchen = Kitchen::new(config);
    let d = load_with_preamble(WITH_CHECK);

    match kitchen.cook(&d, &FeatureOverrides::new()).unwrap_err() {
        Error::PhaseExecution { phase, .. } => assert_eq!(phase, "check"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_check_skipped_by_flag_or_config() {
    let d = load_with_preamble(WITH_CHECK);

    let (_tmp, config) = scratch_kitchen();
    let result = Kitchen::new(config)
        .cook(&d, &"!tests".parse().unwrap())
        .unwrap();
    assert!(result.checks_passed());
    assert!(!result.phases.iter().any(|p| p.phase == Phase::Check));

    let (_tmp, mut config) = scratch_kitchen();
    config.run_check = false;
    let result = Kitchen::new(config).cook(&d, &FeatureOverrides::new()).unwrap();
    assert!(result.checks_passed());
    assert!(result.log.contains("%check (skipped)"));
}

// =============================================================================
// MANIFEST
// =============================================================================

#[test]
fn test_missing_manifest_entry_fails() {
    let (_tmp, config) = scratch_kitchen();
    let kitchen = Kitchen::new(config);
    let d = load_with_preamble(&format!("{}/usr/share/man/man1/demo.1*\n", SIMPLE));

    match kitchen.cook(&d, &FeatureOverrides::new()).unwrap_err() {
        Error::ManifestMismatch { missing, .. } => {
            assert_eq!(missing, vec!["/usr/share/man/man1/demo.1*"]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_unpackaged_files_warn_or_fail() {
    let body = SIMPLE.replace(
        "cp out.txt %{buildroot}%{_bindir}/demo\n",
        "cp out.txt %{buildroot}%{_bindir}/demo\nmkdir -p %{buildroot}/usr/lib && touch %{buildroot}/usr/lib/extra\n",
    );
    let d = load_with_preamble(&body);

    let (_tmp, config) = scratch_kitchen();
    let result = Kitchen::new(config).cook(&d, &FeatureOverrides::new()).unwrap();
    assert_eq!(result.manifest.unpackaged, vec!["/usr/lib/extra"]);
    assert!(result.warnings.iter().any(|w| w.contains("/usr/lib/extra")));

    let (_tmp, mut config) = scratch_kitchen();
    config.manifest.strict_unpackaged = true;
    assert!(matches!(
        Kitchen::new(config).cook(&d, &FeatureOverrides::new()),
        Err(Error::ManifestMismatch { .. })
    ));
}

#[test]
fn test_verify_existing_buildroot() {
    let (_tmp, config) = scratch_kitchen();
    let d = load_with_preamble(SIMPLE);
    let kitchen = Kitchen::new(config.clone());
    kitchen.cook(&d, &FeatureOverrides::new()).unwrap();

    let report = kitchen.verify(&d, &FeatureOverrides::new()).unwrap();
    assert!(report.is_clean());

    fs::remove_file(config.buildroot.join("usr/bin/demo")).unwrap();
    assert!(kitchen.verify(&d, &FeatureOverrides::new()).is_err());
}
