use std::borrow::Cow;

use nearme_app_lib::mk_specta;
use specta_typescript::Typescript;

pub fn main() {
    let args = std::env::args().collect::<Vec<_>>();
    let Some(path) = args.get(1) else {
        eprintln!("Usage: export-types path");
        std::process::exit(1);
    };
    let mut lang = Typescript::new();
    lang.header = Cow::Borrowed(
        "/* eslint @typescript-eslint/no-unused-vars: 0 */\n/* eslint @typescript-eslint/no-explicit-any: 0 */",
    );
    if let Err(why) = mk_specta().export(lang, path) {
        eprintln!("Failed to export bindings to {path}: {why:?}");
        std::process::exit(1);
    }
    println!("Exported commands and events for the tracker UI to {path}");
}
