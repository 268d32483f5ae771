mod pki;
mod soap_call;
