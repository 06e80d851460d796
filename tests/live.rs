use std::time::Duration;

use ctiharvest::{
    limits::{CollectMode, LimitOverrides},
    runner::{Runner, RunnerOptions},
    utils,
};
use headless_chrome::{browser::default_executable, Browser, LaunchOptions};

macro_rules! aw {
    ($e:expr) => {
        tokio_test::block_on($e)
    };
}

/*
RUST_LOG=debug cargo test --test live -- collect_live --exact --ignored
 */
#[test]
#[ignore = "live"]
fn collect_live() -> anyhow::Result<()> {
    env_logger::init();

    let dir = utils::create_random_tmp_folder()?;
    let seed_file = dir.join("seeds.txt");
    std::fs::write(&seed_file, "https://blog.rust-lang.org/\n")?;
    let out_file = dir.join("urls.txt");

    let options = RunnerOptions::default_builder()
        .mode(CollectMode::Safe)
        .overrides(LimitOverrides::default())
        .timeout_secs(20u64)
        .page_visit_cap(5usize)
        .build()?;
    let runner = Runner::new(options)?;
    aw!(runner.run_collect(&seed_file, &out_file))?;

    let urls = utils::read_url_lines(&out_file)?;
    println!("{urls:#?}");
    Ok(())
}

#[test]
#[ignore = "live"]
fn extract_live() -> anyhow::Result<()> {
    env_logger::init();

    let dir = utils::create_random_tmp_folder()?;
    let url_file = dir.join("urls.txt");
    std::fs::write(
        &url_file,
        "https://blog.rust-lang.org/2024/05/02/Rust-1.78.0.html\n",
    )?;

    let options = RunnerOptions::default_builder()
        .timeout_secs(30u64)
        .retries(1u32)
        .build()?;
    let runner = Runner::new(options)?;
    let summary = aw!(runner.run_extract(&url_file, &dir.join("out")))?;
    println!("{summary:#?}");
    Ok(())
}

#[test]
#[ignore = "live"]
fn headless_chrome() -> anyhow::Result<()> {
    env_logger::init();
    let options = LaunchOptions::default_builder()
        .path(Some(default_executable().unwrap()))
        .window_size(Some((1280, 2000)))
        .idle_browser_timeout(Duration::from_secs(45))
        .sandbox(true)
        .build()
        .expect("Couldn't find appropriate Chrome binary.");
    let browser = Browser::new(options)?;
    let tab = browser.new_tab()?;
    tab.navigate_to("https://example.com/")?.wait_until_navigated()?;
    let elems = tab.find_elements("a")?;
    println!("{elems:?}");

    Ok(())
}
