//! Walkthrough of the managed heap: handles, weak references, resurrection,
//! leak reporting and arrays

use managed_heap::{config, create, Array, HeapConfig, HeapError, LeakGuard, Managed, Strong, Weak};
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Simple,
    Resurrection,
    Leak,
    Array,
    Dom,
}

impl Scenario {
    const ALL: [Scenario; 5] = [
        Scenario::Simple,
        Scenario::Resurrection,
        Scenario::Leak,
        Scenario::Array,
        Scenario::Dom,
    ];

    fn parse(name: &str) -> Option<Self> {
        match name {
            "simple" => Some(Scenario::Simple),
            "resurrection" => Some(Scenario::Resurrection),
            "leak" => Some(Scenario::Leak),
            "array" => Some(Scenario::Array),
            "dom" => Some(Scenario::Dom),
            _ => None,
        }
    }

    fn run(self) -> Result<(), HeapError> {
        match self {
            Scenario::Simple => simple(),
            Scenario::Resurrection => resurrection(),
            Scenario::Leak => leak(),
            Scenario::Array => arrays(),
            Scenario::Dom => dom(),
        }
    }
}

#[derive(Debug, Clone)]
struct DemoConfig {
    scenarios: Vec<Scenario>,
    config_path: Option<PathBuf>,
    log_level: Option<String>,
    write_default: bool,
}

fn parse_args() -> Result<DemoConfig, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DemoConfig {
        scenarios: Vec::new(),
        config_path: None,
        log_level: None,
        write_default: false,
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Err(usage(&args[0])),
            "--print-config" => config.write_default = true,
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires an argument")?;
                config.config_path = Some(PathBuf::from(path));
            }
            "--log-level" => {
                i += 1;
                let level = args.get(i).ok_or("--log-level requires an argument")?;
                config.log_level = Some(level.clone());
            }
            "all" => config.scenarios.extend(Scenario::ALL),
            arg if arg.starts_with("--") => {
                return Err(format!("Unknown option: {}", arg));
            }
            name => {
                let scenario = Scenario::parse(name).ok_or_else(|| format!("Unknown scenario: {}", name))?;
                config.scenarios.push(scenario);
            }
        }
        i += 1;
    }

    if config.scenarios.is_empty() && !config.write_default {
        config.scenarios.extend(Scenario::ALL);
    }
    Ok(config)
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {} [OPTIONS] [SCENARIO]...\n\nScenarios: simple, resurrection, leak, array, dom, all\n\nOptions:\n  \
         --config PATH       Read settings from PATH instead of managed-heap.toml\n  \
         --log-level LEVEL   Override the configured log level\n  \
         --print-config      Print the default configuration and exit",
        program
    )
}

struct TestObject;

impl Managed for TestObject {
    fn initialize(&self, this: &Strong<Self>) -> managed_heap::Result<()> {
        println!("{} has been created", this.describe());
        Ok(())
    }

    fn finalize(&self, this: &Strong<Self>) {
        println!("{} will be destroyed", this.describe());
    }
}

impl fmt::Display for TestObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TestObject")
    }
}

fn simple() -> Result<(), HeapError> {
    let mut ref1 = create(TestObject)?;
    let mut ref2 = ref1.clone();
    let weak1 = Weak::from_strong(&ref1)?;
    let weak2 = weak1.clone();

    let show = |ref1: &Strong<TestObject>, ref2: &Strong<TestObject>| {
        println!("ref1 = {}, ref2 = {}, weak1 = {}, weak2 = {}", ref1, ref2, weak1, weak2);
    };

    println!("demo> Initialize variables");
    show(&ref1, &ref2);

    println!("demo> Clear ref1");
    ref1.clear();
    show(&ref1, &ref2);

    println!("demo> Clear ref2, the object is destroyed and both weak references expire");
    ref2.clear();
    show(&ref1, &ref2);
    Ok(())
}

static KEEPER: Mutex<Strong<Phoenix>> = parking_lot::const_mutex(Strong::null());

struct Phoenix {
    lives: Mutex<u32>,
}

impl Managed for Phoenix {
    fn finalize(&self, this: &Strong<Self>) {
        let mut lives = self.lives.lock();
        if *lives > 0 {
            *lives -= 1;
            KEEPER.lock().assign(this);
            println!("{} is finalized, it will be resurrected soon", this.describe());
        } else {
            println!("{} is finalized, but it won't be resurrected", this.describe());
        }
    }

    fn resurrect(&self) {
        println!("Phoenix is resurrected, {} lives left", *self.lives.lock());
    }
}

impl Drop for Phoenix {
    fn drop(&mut self) {
        println!("Finally, Phoenix is dropped");
    }
}

fn resurrection() -> Result<(), HeapError> {
    KEEPER.lock().set(create(Phoenix { lives: Mutex::new(3) })?);
    loop {
        let current = KEEPER.lock().take();
        if current.is_null() {
            return Ok(());
        }
        drop(current);
    }
}

struct Lover {
    name: &'static str,
    partner: Mutex<Strong<Lover>>,
}

impl Managed for Lover {}

fn lover(name: &'static str) -> Result<Strong<Lover>, HeapError> {
    create(Lover {
        name,
        partner: Mutex::new(Strong::null()),
    })
}

fn leak() -> Result<(), HeapError> {
    let romeo = lover("Romeo")?;
    let juliet = lover("Juliet")?;
    romeo.partner.lock().assign(&juliet);
    juliet.partner.lock().assign(&romeo);

    println!(
        "{} and {} hold each other strongly, neither will be destroyed",
        romeo.name, juliet.name
    );
    if !managed_heap::diagnostics::ENABLED {
        println!("Leak tracking is compiled out, build with --features leak-monitor to see the report");
    }
    Ok(())
}

#[derive(Clone, Default)]
struct Value {
    name: String,
}

impl Drop for Value {
    fn drop(&mut self) {
        println!("Value '{}' is dropped", self.name);
    }
}

fn fibonacci(length: i64) -> Result<Strong<Array<i64>>, HeapError> {
    if length < 2 {
        return Err(HeapError::invalid_argument("length must be at least 2"));
    }
    let mut array = Array::<i64>::new_plain(length, false)?;
    if let Some(slots) = array.as_mut_slice() {
        slots[0] = 1;
        slots[1] = 1;
        for i in 2..slots.len() {
            slots[i] = slots[i - 2] + slots[i - 1];
        }
    }
    Ok(array)
}

fn negate(array: &mut Strong<Array<i64>>) {
    if let Some(slots) = array.as_mut_slice() {
        for slot in slots {
            *slot = -*slot;
        }
    }
}

fn arrays() -> Result<(), HeapError> {
    println!("demo> Value array, every element is constructed and dropped");
    let names: Vec<Value> = (0..3).map(|i| Value { name: format!("Item-{}", i) }).collect();
    let values = Array::of(names)?;
    println!("{} values created", values.length());
    drop(values);

    let mut fib = fibonacci(10)?;
    println!("demo> Fibonacci array: {}", *fib);
    negate(&mut fib);
    println!("demo> Negated: {}", *fib);

    let middle = fib.clone_range(3, 6)?;
    println!("demo> Elements 3..6: {}", *middle);

    if let Err(err) = fib.at(fib.len()) {
        println!("demo> Out of range access: {}", err);
    }
    if let Err(err) = fib.clone_range(3, 1) {
        println!("demo> Bad range: {}", err);
    }
    Ok(())
}

enum Kind {
    Element(&'static str),
    Text(&'static str),
}

struct Node {
    kind: Kind,
    parent: Mutex<Weak<Node>>,
    children: Mutex<Vec<Strong<Node>>>,
}

impl Managed for Node {
    fn finalize(&self, _this: &Strong<Self>) {
        match self.kind {
            Kind::Element(name) => println!("<{}> is destroyed", name),
            Kind::Text(value) => println!("\"{}\" is destroyed", value),
        }
    }
}

fn node(kind: Kind) -> Result<Strong<Node>, HeapError> {
    create(Node {
        kind,
        parent: Mutex::new(Weak::new()),
        children: Mutex::new(Vec::new()),
    })
}

fn append(parent: &Strong<Node>, child: Strong<Node>) -> Result<(), HeapError> {
    let old_parent = child.parent.lock().get();
    if !old_parent.is_null() {
        old_parent.children.lock().retain(|c| c != &child);
    }
    child.parent.lock().assign(parent)?;
    parent.children.lock().push(child);
    Ok(())
}

fn render(node: &Strong<Node>, depth: usize) {
    let indent = "  ".repeat(depth);
    match node.kind {
        Kind::Text(value) => println!("{}{}", indent, value),
        Kind::Element(name) => {
            let children = node.children.lock().clone();
            if children.is_empty() {
                println!("{}<{}/>", indent, name);
                return;
            }
            println!("{}<{}>", indent, name);
            for child in &children {
                render(child, depth + 1);
            }
            println!("{}</{}>", indent, name);
        }
    }
}

fn dom() -> Result<(), HeapError> {
    let html = node(Kind::Element("html"))?;
    let head = node(Kind::Element("head"))?;
    let title = node(Kind::Element("title"))?;
    let body = node(Kind::Element("body"))?;

    append(&title, node(Kind::Text("Managed heap"))?)?;
    append(&head, title.clone())?;
    append(&html, head)?;
    append(&html, body.clone())?;
    render(&html, 0);

    println!("demo> Move <title> into <body>");
    append(&body, title)?;
    render(&html, 0);

    println!("demo> Drop the document");
    drop(body);
    drop(html);
    Ok(())
}

fn run(demo: DemoConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut heap_config = match &demo.config_path {
        Some(path) => HeapConfig::load(path)?,
        None => HeapConfig::discover(),
    }
    .with_env_overrides();

    if demo.write_default {
        print!("{}", HeapConfig::generate_default());
        return Ok(());
    }
    if let Some(level) = demo.log_level {
        heap_config.logging.level = level;
    }

    let _log_guard = managed_heap::init(heap_config)?;
    let _leaks = LeakGuard::new();
    tracing::info!(
        track_leaks = config::current().diagnostics.track_leaks,
        scenarios = demo.scenarios.len(),
        "heap demo starting"
    );

    for scenario in demo.scenarios {
        println!("==== {:?} ====", scenario);
        scenario.run()?;
    }
    Ok(())
}

fn main() {
    let demo = match parse_args() {
        Ok(demo) => demo,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(demo) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
