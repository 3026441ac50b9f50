use loadctl::error::AppResult;

fn main() -> AppResult<()> {
    loadctl::entry::run()
}
