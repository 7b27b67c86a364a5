/// A page of results plus the cursor to pass as `?cursor=` for the next page.
/// `next_cursor` is `None` once the caller has seen everything.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}
