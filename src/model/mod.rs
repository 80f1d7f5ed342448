//! Records exchanged across the Persister contract.

mod document;
mod file;
mod principal;
mod task;
mod tenant;

pub use document::{
    document_id, Document, ListParams, PagedResult, ACCOUNT_FIELD, DEFAULT_PAGE_SIZE, ID_FIELD,
    MAX_PAGE_SIZE,
};
pub use file::{File, FunctionInfo};
pub use principal::{Principal, ROOT_ROLE};
pub use task::Task;
pub use tenant::{Base, Customer};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_params_default() {
        let params = ListParams::default();
        assert_eq!(params.effective_page(), 1);
        assert_eq!(params.effective_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(params.skip(), 0);
        assert_eq!(params.sort_field(), ID_FIELD);
    }

    #[test]
    fn test_list_params_zero_page_and_size() {
        let params = ListParams::page(0, 0);
        assert_eq!(params.effective_page(), 1);
        assert_eq!(params.effective_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_list_params_skip() {
        let params = ListParams::page(3, 10);
        assert_eq!(params.skip(), 20);
    }

    #[test]
    fn test_list_params_size_capped() {
        let params = ListParams::page(1, 50_000);
        assert_eq!(params.effective_size(), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_list_params_empty_sort_falls_back_to_id() {
        let params = ListParams::default().sorted_by("", true);
        assert_eq!(params.sort_field(), ID_FIELD);
        assert!(params.sort_descending);
    }

    #[test]
    fn test_principal_scope() {
        let user = Principal::new("acct", "user", "u@example.com", 0);
        assert_eq!(user.scope(), Some("acct"));

        let root = Principal::new("acct", "user", "u@example.com", ROOT_ROLE);
        assert_eq!(root.scope(), None);
    }

    #[test]
    fn test_customer_email_lowercased() {
        let customer = Customer::new("Admin@Example.COM", "cus_1", "sub_1");
        assert_eq!(customer.email, "admin@example.com");
        assert!(!customer.is_active);
        assert!(customer.id.is_empty());
    }
}
